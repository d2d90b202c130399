//! `sbtrust status` - Firmware trust state and installed tools.

use anyhow::Result;
use colored::Colorize;

use sbtrust::system::{self, SystemInfo};

use super::Context;
use crate::education::Explain;
use crate::output::yes_no;

pub async fn execute(ctx: Context) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::status().print();
    }

    let sys = ctx.subsystem().await?;
    let info = system::system_info(&sys.probe, &sys.distro, sys.runner.as_ref(), &sys.settings.paths).await;

    if !ctx.output_format.emit(&info)? {
        print_status_pretty(&info);
    }

    Ok(())
}

fn print_status_pretty(info: &SystemInfo) {
    let state = &info.trust_state;

    println!("{}", "Platform".bold());
    println!("  {} {}", "UEFI:".bold(), yes_no(info.is_uefi));
    let sb = if state.is_ambiguous() {
        "unknown".yellow().to_string()
    } else if state.secure_boot_enabled {
        "enabled".green().to_string()
    } else {
        "disabled".red().to_string()
    };
    println!("  {} {} {}", "Secure Boot:".bold(), sb, format!("(via {})", state.detection_method).dimmed());
    println!("  {} {}", "Setup mode:".bold(), yes_no(info.setup_mode));
    if let Some(kernel) = &info.running_kernel {
        println!("  {} {}", "Running kernel:".bold(), kernel.cyan());
    }
    println!();

    println!("{}", "Distribution".bold());
    let name = if info.distro.name.is_empty() { &info.distro.id } else { &info.distro.name };
    println!("  {} {} {}", "Name:".bold(), name, info.distro.version_id.dimmed());
    println!("  {} {:?}", "Initrd tool:".bold(), info.packaging.initrd_tool);
    println!(
        "  {} {}",
        "Modules compressed by default:".bold(),
        yes_no(info.packaging.compresses_modules_by_default)
    );
    println!("  {} {}", "Sign after packaging:".bold(), yes_no(info.packaging.sign_after_packaging));
    println!();

    println!("{}", "Dependencies".bold());
    if info.dependencies.all_installed {
        println!("  {}", "All tools installed".green());
    } else {
        println!("  {} {}", "Missing:".red().bold(), info.dependencies.missing.join(", "));
    }

    if state.requires_signing() {
        println!();
        println!(
            "{} Secure Boot is enforcing: custom kernels must be signed ({}).",
            "Note:".yellow().bold(),
            "sbtrust sign <version>".cyan()
        );
    }
}
