//! `sbtrust keys` - Signing identities.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use sbtrust_core::{CertificateSummary, SigningIdentity};

use super::Context;
use crate::cli::args::{KeysArgs, KeysCommands};
use crate::education::Explain;

#[derive(Tabled)]
struct IdentityRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Common name")]
    common_name: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Complete")]
    complete: String,
}

#[derive(Serialize)]
struct IdentityDetails<'a> {
    #[serde(flatten)]
    identity: &'a SigningIdentity,
    certificate: &'a CertificateSummary,
}

pub async fn execute(ctx: Context, args: KeysArgs) -> Result<()> {
    match args.command {
        KeysCommands::Generate { name, common_name } => {
            generate(ctx, name.as_deref(), common_name.as_deref()).await
        }
        KeysCommands::List => list(ctx).await,
        KeysCommands::Show { name } => show(ctx, name.as_deref()).await,
    }
}

async fn generate(ctx: Context, name: Option<&str>, common_name: Option<&str>) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::keys_generate().print();
    }

    let sys = ctx.subsystem().await?;
    let name = ctx.identity_name(name);
    let identity = sys.keys.generate(name, common_name).await?;

    if !ctx.output_format.emit(&identity)? {
        println!("{} Generated identity {}.", "Success:".green().bold(), identity.name.cyan());
        println!("  {} {}", "Common name:".bold(), identity.common_name);
        println!("  {} {}", "Private key:".bold(), identity.private_key_path.display());
        println!("  {} {}", "Certificate:".bold(), identity.cert_der_path.display());
        println!();
        println!(
            "Next: {} to have the firmware trust it.",
            format!("sbtrust mok import --name {}", identity.name).cyan()
        );
    }

    Ok(())
}

async fn list(ctx: Context) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::keys().print();
    }

    let sys = ctx.subsystem().await?;
    let identities = sys.keys.list()?;

    if ctx.output_format.emit(&identities)? {
        return Ok(());
    }

    if identities.is_empty() {
        println!("{}", "No signing identities yet.".dimmed());
        println!("Create one with {}.", "sbtrust keys generate".cyan());
        return Ok(());
    }

    let rows: Vec<IdentityRow> = identities
        .iter()
        .map(|id| IdentityRow {
            name: id.name.clone(),
            common_name: id.common_name.clone(),
            created: id.created_at.format("%Y-%m-%d %H:%M").to_string(),
            complete: if id.is_complete() { "yes".to_string() } else { "no".red().to_string() },
        })
        .collect();

    println!("{}", Table::new(&rows).with(Style::rounded()));
    println!();
    println!("{} {}", "Keys directory:".bold(), sys.keys.keys_dir().display());

    Ok(())
}

async fn show(ctx: Context, name: Option<&str>) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::keys().print();
    }

    let sys = ctx.subsystem().await?;
    let identity = sys.keys.require(ctx.identity_name(name))?;
    let certificate = sys.keys.describe(&identity).await?;

    let details = IdentityDetails {
        identity: &identity,
        certificate: &certificate,
    };
    if ctx.output_format.emit(&details)? {
        return Ok(());
    }

    println!("{} {}", "Identity:".bold(), identity.name.cyan().bold());
    println!();
    println!("  {} {}", "Subject:".bold(), certificate.subject);
    println!("  {} {}", "Issuer:".bold(), certificate.issuer);
    println!("  {} {}", "Serial:".bold(), certificate.serial);
    println!("  {} {}", "Valid from:".bold(), certificate.not_before.format("%Y-%m-%d"));
    println!("  {} {}", "Valid until:".bold(), certificate.not_after.format("%Y-%m-%d"));
    println!("  {} {}", "SHA-1:".bold(), certificate.sha1_fingerprint.dimmed());
    println!("  {} {}", "SHA-256:".bold(), certificate.sha256_fingerprint.dimmed());
    println!();
    println!("  {} {}", "Private key:".bold(), identity.private_key_path.display());
    println!("  {} {}", "DER:".bold(), identity.cert_der_path.display());
    println!("  {} {}", "PEM:".bold(), identity.cert_pem_path.display());

    Ok(())
}
