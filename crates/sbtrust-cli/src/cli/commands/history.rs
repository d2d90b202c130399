//! `sbtrust history` - Audit trail.

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use tabled::{settings::Style, Table, Tabled};

use sbtrust::{HistoryEntry, HistoryLog};

use super::Context;
use crate::cli::args::{HistoryArgs, HistoryCommands};
use crate::education::Explain;

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "When")]
    timestamp: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "OK")]
    success: String,
    #[tabled(rename = "Details")]
    details: String,
}

impl From<&HistoryEntry> for EntryRow {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            timestamp: entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            action: entry.action.to_string(),
            success: if entry.success { "yes".green().to_string() } else { "no".red().to_string() },
            details: summarize(&entry.details),
        }
    }
}

pub async fn execute(ctx: Context, args: HistoryArgs) -> Result<()> {
    let log = HistoryLog::new(ctx.settings.history_file(), ctx.settings.history_cap);
    match args.command {
        None => list(&ctx, &log, args.limit).await,
        Some(HistoryCommands::Clear { yes }) => clear(&log, yes).await,
    }
}

async fn list(ctx: &Context, log: &HistoryLog, limit: usize) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::history().print();
    }

    let entries = log.recent(limit).await;
    if ctx.output_format.emit(&entries)? {
        return Ok(());
    }

    if entries.is_empty() {
        println!("{}", "No history yet.".dimmed());
        return Ok(());
    }

    let rows: Vec<EntryRow> = entries.iter().map(EntryRow::from).collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

async fn clear(log: &HistoryLog, yes: bool) -> Result<()> {
    if !yes
        && !Confirm::new()
            .with_prompt("Delete the signing and enrollment history?")
            .default(false)
            .interact()?
    {
        println!("{}", "Aborted.".dimmed());
        return Ok(());
    }

    log.clear().await?;
    println!("{} History cleared.", "Success:".green().bold());
    Ok(())
}

/// One-line rendering of an entry's details object.
fn summarize(details: &serde_json::Value) -> String {
    match details {
        serde_json::Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
