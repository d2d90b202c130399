//! `sbtrust diagnose` - Why a custom kernel may not boot, and what to do.

use anyhow::Result;
use colored::Colorize;

use sbtrust::{DiagnosisResult, Issue, Remediation};

use super::Context;
use crate::education::Explain;

pub async fn execute(ctx: Context) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::diagnose().print();
    }

    let sys = ctx.subsystem().await?;
    let result = sys.diagnosis.diagnose().await?;

    if !ctx.output_format.emit(&result)? {
        print_diagnosis_pretty(&result);
    }

    Ok(())
}

fn print_diagnosis_pretty(result: &DiagnosisResult) {
    let tag = result.issue.tag();
    let headline = if result.is_ok() {
        tag.green().bold()
    } else {
        tag.yellow().bold()
    };
    println!("{} {}", "Diagnosis:".bold(), headline);
    println!();
    println!("{}", result.message);

    if let Issue::KernelSignatureIssues { kernels } = &result.issue {
        println!();
        for kernel in kernels {
            println!("  {}", kernel.kernel_version.cyan().bold());
            for problem in &kernel.problems {
                println!("    - {problem}");
            }
        }
    }

    if !result.solutions.is_empty() {
        println!();
        println!("{}", "What to do:".bold());
        for (i, solution) in result.solutions.iter().enumerate() {
            println!("  {}. {}", i + 1, solution);
        }
    }

    match (&result.issue, result.issue.remediation()) {
        (_, Some(Remediation::EnrollKey)) => {
            println!();
            println!("{} {}", "Run:".bold(), "sbtrust keys generate && sbtrust mok import".cyan());
        }
        (Issue::KernelSignatureIssues { kernels }, Some(Remediation::SignKernels)) => {
            println!();
            for kernel in kernels {
                println!("{} {}", "Run:".bold(), format!("sbtrust sign {}", kernel.kernel_version).cyan());
            }
        }
        _ => {}
    }
}
