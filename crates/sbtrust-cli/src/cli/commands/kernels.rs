//! `sbtrust kernels` - Custom kernels and their artifacts.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};

use super::Context;
use crate::education::Explain;

#[derive(Debug, Serialize)]
struct KernelSummary {
    kernel_version: String,
    modules: usize,
    boot_image: Option<PathBuf>,
    boot_image_exact: bool,
    initrd: Option<PathBuf>,
}

#[derive(Tabled)]
struct KernelRow {
    #[tabled(rename = "Kernel")]
    version: String,
    #[tabled(rename = "Modules")]
    modules: usize,
    #[tabled(rename = "Boot image")]
    boot_image: String,
    #[tabled(rename = "Initrd")]
    initrd: String,
}

pub async fn execute(ctx: Context) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::kernels().print();
    }

    let sys = ctx.subsystem().await?;
    let mut kernels = Vec::new();
    for version in sys.inventory.custom_kernels(&sys.locator).await? {
        let modules = sys.locator.modules_for(&version).map(|m| m.len()).unwrap_or(0);
        let boot_image = sys.locator.boot_image_for(&version);
        kernels.push(KernelSummary {
            modules,
            boot_image_exact: boot_image.as_ref().is_some_and(sbtrust::BootImageMatch::is_exact),
            boot_image: boot_image.map(|b| b.path),
            initrd: sys.locator.initrd_for(&version),
            kernel_version: version,
        });
    }

    if ctx.output_format.emit(&kernels)? {
        return Ok(());
    }

    if kernels.is_empty() {
        println!("{}", "No custom kernels installed.".dimmed());
        return Ok(());
    }

    let rows: Vec<KernelRow> = kernels
        .iter()
        .map(|k| KernelRow {
            version: k.kernel_version.clone(),
            modules: k.modules,
            boot_image: k.boot_image.as_ref().map_or_else(
                || "-".to_string(),
                |p| {
                    let name = file_name(p);
                    if k.boot_image_exact { name } else { format!("{name} (guessed)") }
                },
            ),
            initrd: k.initrd.as_deref().map_or_else(|| "-".to_string(), file_name),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    println!();
    println!("{} custom kernel(s)", kernels.len().to_string().bold());

    Ok(())
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
