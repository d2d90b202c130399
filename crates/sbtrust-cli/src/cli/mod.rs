//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;

use anyhow::Result;
use args::{Cli, Commands};
use clap::Parser;

use crate::config::Config;
use crate::logging;
use crate::output::OutputFormat;

/// Run the CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // The helper speaks the protocol on stdout; nothing else may print there.
    if matches!(cli.command, Commands::Helper) {
        logging::init(None, cli.verbose);
        return commands::helper::execute().await;
    }

    // Load configuration
    let config_path = Config::resolve_path(cli.config.as_deref())?;
    let config = Config::load(Some(&config_path))?;

    logging::init(Some(&config.trust.debug_log()), cli.verbose);
    tracing::debug!(config = %config_path.display(), "configuration loaded");

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Determine output format
    let output_format = cli
        .output
        .or(config.output_format)
        .unwrap_or(OutputFormat::Pretty);

    // Create context for commands
    let ctx = commands::Context {
        output_format,
        explain: cli.explain || config.explain_by_default,
        verbose: cli.verbose,
        no_color: cli.no_color,
        config_path,
        settings: config.trust,
    };

    // Dispatch to appropriate command
    match cli.command {
        Commands::Status => commands::status::execute(ctx).await,
        Commands::Diagnose => commands::diagnose::execute(ctx).await,
        Commands::Kernels => commands::kernels::execute(ctx).await,
        Commands::Keys(args) => commands::keys::execute(ctx, args).await,
        Commands::Mok(args) => commands::mok::execute(ctx, args).await,
        Commands::Sign(args) => commands::sign::execute(ctx, args).await,
        Commands::Verify(args) => commands::verify::execute(ctx, args).await,
        Commands::History(args) => commands::history::execute(ctx, args).await,
        Commands::Deps => commands::deps::execute(ctx).await,
        Commands::Config(args) => commands::config::execute(ctx, args).await,
        Commands::Helper => commands::helper::execute().await,
    }
}
