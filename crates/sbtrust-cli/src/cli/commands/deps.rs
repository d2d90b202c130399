//! `sbtrust deps` - External tool dependencies.

use anyhow::Result;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use sbtrust::system::{self, DependencyReport};
use sbtrust::SystemRunner;

use super::Context;
use crate::education::Explain;

#[derive(Tabled)]
struct DependencyRow {
    #[tabled(rename = "Tool")]
    name: String,
    #[tabled(rename = "Installed")]
    installed: String,
    #[tabled(rename = "Used for")]
    purpose: String,
    #[tabled(rename = "Path")]
    path: String,
}

pub async fn execute(ctx: Context) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::deps().print();
    }

    let running = system::running_kernel();
    let report = system::check_dependencies(&SystemRunner::new(), &ctx.settings.paths, running.as_deref());

    if !ctx.output_format.emit(&report)? {
        print_report_pretty(&report);
    }

    if !report.all_installed {
        anyhow::bail!("missing tools: {}", report.missing.join(", "));
    }
    Ok(())
}

fn print_report_pretty(report: &DependencyReport) {
    let rows: Vec<DependencyRow> = report
        .dependencies
        .iter()
        .map(|d| DependencyRow {
            name: d.name.clone(),
            installed: if d.installed { "yes".green().to_string() } else { "no".red().to_string() },
            purpose: d.purpose.clone(),
            path: d.path.as_ref().map_or_else(|| "-".to_string(), |p| p.display().to_string()),
        })
        .collect();

    println!("{}", Table::new(&rows).with(Style::rounded()));
}
