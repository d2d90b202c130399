//! `sbtrust verify` - Check whether a kernel is signed.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tracing::warn;

use sbtrust::{BootImageCheck, ModuleSignature, SampleReport};

use super::{absolute, Context};
use crate::cli::args::VerifyArgs;
use crate::education::Explain;

#[derive(Debug, Serialize)]
struct VerifyReport {
    kernel_version: String,
    modules: SampleReport,
    initrd: Option<SampleReport>,
    boot_image: BootImageCheck,
}

impl VerifyReport {
    fn is_signed(&self) -> bool {
        self.modules.is_signed
            && self.initrd.map_or(true, |r| r.is_signed)
            && !matches!(self.boot_image, BootImageCheck::Unsigned)
    }
}

pub async fn execute(ctx: Context, args: VerifyArgs) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::verify().print();
    }

    let sys = ctx.subsystem().await?;

    if let Some(path) = &args.module {
        let signature = sys.sampler.check_module(&absolute(path)?).await?;
        if !ctx.output_format.emit(&signature)? {
            print_module_pretty(&signature);
        }
        return Ok(());
    }
    let Some(version) = args.kernel else {
        anyhow::bail!("a kernel version or --module is required");
    };

    let sample_size = args.sample_size.unwrap_or(sys.settings.sample_size).max(1);

    let modules = sys.sampler.sample_kernel(&version, sample_size).await?;
    let initrd = match sys.sampler.sample_initrd(&version, sample_size).await {
        Ok(report) => report,
        Err(e) => {
            warn!(kernel = %version, error = %e, "initrd sampling failed");
            None
        }
    };
    let identity = sys.keys.load(ctx.identity_name(args.name.as_deref()));
    let boot_image = sys.sampler.check_boot_image(&version, identity.as_ref()).await;

    let report = VerifyReport {
        kernel_version: version,
        modules,
        initrd,
        boot_image,
    };

    if !ctx.output_format.emit(&report)? {
        print_report_pretty(&report);
    }

    Ok(())
}

fn print_report_pretty(report: &VerifyReport) {
    println!("{} {}", "Kernel:".bold(), report.kernel_version.cyan().bold());
    println!("  {} {}", "Modules:".bold(), sample_line(&report.modules));
    match &report.initrd {
        Some(sample) => println!("  {} {}", "Initrd:".bold(), sample_line(sample)),
        None => println!("  {} {}", "Initrd:".bold(), "no initrd or no modules inside".dimmed()),
    }
    let boot = match &report.boot_image {
        BootImageCheck::Signed => "signed".green().to_string(),
        BootImageCheck::Unsigned => "not signed by your certificate".red().to_string(),
        BootImageCheck::Unsupported => "not applicable on this architecture".dimmed().to_string(),
        BootImageCheck::Unavailable { reason } => format!("{} ({reason})", "not checked".yellow()),
    };
    println!("  {} {}", "Boot image:".bold(), boot);
    println!();

    if report.is_signed() {
        println!("{} {} looks signed.", "Success:".green().bold(), report.kernel_version);
    } else {
        println!(
            "{} {} is not fully signed. Run {}.",
            "Warning:".yellow().bold(),
            report.kernel_version,
            format!("sbtrust sign {}", report.kernel_version).cyan()
        );
    }
    println!("{}", "Results are based on a random sample of modules.".dimmed());
}

fn print_module_pretty(sig: &ModuleSignature) {
    println!("{} {}", "Module:".bold(), sig.path.display().to_string().cyan().bold());
    if !sig.signed {
        println!("  {} {}", "Signature:".bold(), "none".red());
        return;
    }
    println!(
        "  {} {}",
        "Signature:".bold(),
        sig.sig_id.as_deref().unwrap_or("present").green()
    );
    let rows = [
        ("Signer:", &sig.signer),
        ("Key id:", &sig.sig_key),
        ("Digest:", &sig.sig_hashalgo),
    ];
    for (label, value) in rows {
        if let Some(value) = value {
            println!("  {} {}", label.bold(), value);
        }
    }
}

fn sample_line(sample: &SampleReport) -> String {
    let verdict = if sample.is_signed {
        "signed".green()
    } else {
        "unsigned".red()
    };
    format!(
        "{} ({}/{} sampled modules signed, {:.0}%)",
        verdict,
        sample.signed,
        sample.checked,
        sample.ratio() * 100.0
    )
}
