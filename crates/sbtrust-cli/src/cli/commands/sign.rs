//! `sbtrust sign` - Sign a kernel's modules and boot image.

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use sbtrust::signing::ProgressFn;
use sbtrust::{
    system, BootImageOutcome, CancelToken, InitrdOutcome, SignRequest, SigningResult, Subsystem,
};

use super::{absolute, Context};
use crate::cli::args::SignArgs;
use crate::education::Explain;
use crate::output::OutputFormat;

pub async fn execute(mut ctx: Context, args: SignArgs) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::sign().print();
    }

    if let Some(secs) = args.timeout {
        ctx.settings.signing_timeout_secs = secs;
    }
    let sys = ctx.subsystem().await?;

    if let Some(module) = &args.module {
        return sign_one(&ctx, &sys, module, &args).await;
    }
    let Some(version) = args.kernel.as_deref() else {
        anyhow::bail!("a kernel version or --module is required");
    };

    let mut request = SignRequest::installed(version, ctx.identity_name(args.name.as_deref()));
    if let Some(root) = &args.staged {
        request = request.staged(root);
    }
    if args.no_boot_image {
        request = request.without_boot_image();
    }

    let cancel = CancelToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling after the current module");
                eprintln!("{}", "Cancelling after the current module...".yellow());
                cancel.cancel();
            }
        })
    };

    let bar = progress_bar(ctx.output_format);
    let report: &ProgressFn<'_> = &|current, total, module| {
        bar.set_length(total as u64);
        bar.set_position(current as u64);
        bar.set_message(module.to_string());
    };

    let outcome = sys.signing.sign_kernel(&request, Some(report), &cancel).await;
    watcher.abort();
    bar.finish_and_clear();
    let result = outcome?;

    if !ctx.output_format.emit(&result)? {
        print_result_pretty(&result);
    }

    if result.cancelled {
        anyhow::bail!("signing of {} was cancelled", result.kernel_version);
    }
    if !result.is_success() {
        result.ensure_complete()?;
        anyhow::bail!("signing of {version} did not complete cleanly");
    }

    Ok(())
}

async fn sign_one(ctx: &Context, sys: &Subsystem, module: &Path, args: &SignArgs) -> Result<()> {
    let module = absolute(module)?;
    let kernel = args
        .kernel
        .clone()
        .or_else(|| sys.locator.kernel_for_module(&module))
        .or_else(system::running_kernel)
        .ok_or_else(|| anyhow::anyhow!("cannot tell which kernel {} belongs to; pass its version", module.display()))?;
    info!(module = %module.display(), kernel = %kernel, "signing single module");

    let result = sys
        .signing
        .sign_module_file(&module, &kernel, ctx.identity_name(args.name.as_deref()))
        .await?;

    if !ctx.output_format.emit(&result)? {
        match result.failures.first() {
            None => println!("{} {} is signed.", "Success:".green().bold(), module.display()),
            Some(failure) => println!("{} {}: {}", "Failed:".red().bold(), module.display(), failure.reason),
        }
    }
    result.ensure_complete()?;
    Ok(())
}

fn progress_bar(format: OutputFormat) -> ProgressBar {
    if format != OutputFormat::Pretty {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_result_pretty(result: &SigningResult) {
    if result.deferred {
        println!(
            "{} Signing of {} is deferred on this distribution: run {} once the packaged kernel is installed.",
            "Note:".yellow().bold(),
            result.kernel_version.cyan(),
            format!("sbtrust sign {}", result.kernel_version).cyan()
        );
        return;
    }

    println!("{} {}", "Kernel:".bold(), result.kernel_version.cyan().bold());
    println!(
        "  {} {} signed, {} failed, {} attempted",
        "Modules:".bold(),
        result.signed.to_string().green(),
        if result.failed > 0 { result.failed.to_string().red() } else { result.failed.to_string().normal() },
        result.attempted
    );
    for failure in &result.failures {
        println!("    {} {}: {}", "-".red(), failure.path.display(), failure.reason.dimmed());
    }

    let boot = match &result.boot_image {
        BootImageOutcome::NotRequested => "not requested".dimmed().to_string(),
        BootImageOutcome::Signed { path, backup } => format!(
            "{} {} (unsigned original kept at {})",
            "signed".green(),
            path.display(),
            backup.display()
        ),
        BootImageOutcome::Skipped { reason } => format!("{} ({reason})", "skipped".yellow()),
        BootImageOutcome::Failed { reason } => format!("{} ({reason})", "failed".red()),
    };
    println!("  {} {}", "Boot image:".bold(), boot);

    let initrd = match &result.initrd {
        InitrdOutcome::NotNeeded => "not rebuilt".dimmed().to_string(),
        InitrdOutcome::Rebuilt => "rebuilt".green().to_string(),
        InitrdOutcome::Failed { reason } => format!("{} ({reason})", "failed".red()),
    };
    println!("  {} {}", "Initrd:".bold(), initrd);

    if result.cancelled {
        println!();
        println!("{} Cancelled; modules already signed stay signed.", "Note:".yellow().bold());
    } else if result.is_success() {
        println!();
        println!("{} {} is signed.", "Success:".green().bold(), result.kernel_version);
    }
}
