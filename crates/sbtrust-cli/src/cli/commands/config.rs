//! `sbtrust config` - CLI configuration management.

use anyhow::Result;
use colored::Colorize;

use super::Context;
use crate::cli::args::{ConfigArgs, ConfigCommands};
use crate::config::Config;
use crate::output::OutputFormat;

pub async fn execute(ctx: Context, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(ctx).await,
        ConfigCommands::Set { key, value } => set_config(ctx, &key, &value).await,
        ConfigCommands::Path => show_path(ctx).await,
    }
}

async fn show_config(ctx: Context) -> Result<()> {
    let config = Config::read(&ctx.config_path)?;

    match ctx.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(&config)?);
        }
        OutputFormat::Pretty => {
            let trust = &ctx.settings;
            println!("{}", "Current Configuration:".bold());
            println!();

            println!("  {} {}", "output_format:".bold(), config.output_format.unwrap_or_default());
            println!("  {} {}", "explain_by_default:".bold(), config.explain_by_default);
            println!("  {} {}", "state_dir:".bold(), trust.state_dir.display());
            println!("  {} {}", "identity_name:".bold(), trust.identity_name);
            println!("  {} {}", "sample_size:".bold(), trust.sample_size);
            println!("  {} {}", "module_threshold:".bold(), trust.module_threshold);
            println!("  {} {}", "initrd_threshold:".bold(), trust.initrd_threshold);
            println!("  {} {}s", "signing_timeout_secs:".bold(), trust.signing_timeout_secs);
            println!("  {} {}s", "privileged_timeout_secs:".bold(), trust.privileged_timeout_secs);
            println!("  {} {}", "history_cap:".bold(), trust.history_cap);
            println!("  {} {}", "launcher:".bold(), trust.launcher);
            println!("  {} {}", "identity_markers:".bold(), trust.identity_markers.join(", "));
        }
    }

    Ok(())
}

async fn set_config(ctx: Context, key: &str, value: &str) -> Result<()> {
    let mut config = Config::read(&ctx.config_path)?;
    config.set(key, value)?;
    config.save(&ctx.config_path)?;

    println!("{} {} set to {}.", "Success:".green().bold(), key, value.cyan());
    Ok(())
}

async fn show_path(ctx: Context) -> Result<()> {
    println!("{}", ctx.config_path.display());
    Ok(())
}
