//! `sbtrust mok` - Machine Owner Key enrollment.

use anyhow::Result;
use colored::Colorize;
use dialoguer::{Confirm, Password};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use sbtrust::{EnrollmentSecret, MokKey};

use super::Context;
use crate::cli::args::{MokArgs, MokChangeArgs, MokCommands};
use crate::education::Explain;
use crate::output::yes_no;

#[derive(Tabled)]
struct KeyRow {
    #[tabled(rename = "Key")]
    index: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Valid until")]
    not_after: String,
    #[tabled(rename = "SHA-1")]
    fingerprint: String,
}

impl From<&MokKey> for KeyRow {
    fn from(key: &MokKey) -> Self {
        Self {
            index: key.index.clone(),
            subject: key.subject.clone().unwrap_or_default(),
            not_after: key.not_after.clone().unwrap_or_default(),
            fingerprint: key
                .sha1_fingerprint
                .as_deref()
                .map(|f| f.chars().take(16).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct ChangeOutcome<'a> {
    action: &'a str,
    identity: Option<&'a str>,
    output: String,
}

pub async fn execute(ctx: Context, args: MokArgs) -> Result<()> {
    match args.command {
        MokCommands::List => list(ctx).await,
        MokCommands::Status => status(ctx).await,
        MokCommands::Import(change) => import(ctx, change).await,
        MokCommands::Delete(change) => delete(ctx, change).await,
        MokCommands::Reset { root_pw, yes } => reset(ctx, root_pw, yes).await,
    }
}

async fn list(ctx: Context) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::mok_list().print();
    }

    let sys = ctx.subsystem().await?;
    let listing = sys.enrollment.listing().await?;

    if ctx.output_format.emit(&*listing)? {
        return Ok(());
    }

    print_keys("Enrolled keys", &listing.enrolled);
    println!();
    print_keys("Pending enrollment", &listing.pending);

    Ok(())
}

fn print_keys(title: &str, keys: &[MokKey]) {
    println!("{}", title.bold());
    if keys.is_empty() {
        println!("  {}", "(none)".dimmed());
        return;
    }
    let rows: Vec<KeyRow> = keys.iter().map(KeyRow::from).collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

async fn status(ctx: Context) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::mok_list().print();
    }

    let sys = ctx.subsystem().await?;
    let identities = sys.keys.list()?;
    let status = sys.enrollment.status(&identities).await?;

    if ctx.output_format.emit(&status)? {
        return Ok(());
    }

    println!("  {} {}", "Enrolled:".bold(), yes_no(status.enrolled));
    println!("  {} {}", "Pending:".bold(), yes_no(status.pending));
    match (&status.matched_identity_name, status.enrolled || status.pending) {
        (Some(name), _) => println!("  {} {}", "Identity:".bold(), name.cyan()),
        (None, true) => println!("  {} {}", "Identity:".bold(), "(older signing key)".dimmed()),
        (None, false) => {}
    }
    if status.pending {
        println!();
        println!("Reboot and confirm the enrollment in the MOK manager.");
    }

    Ok(())
}

async fn import(ctx: Context, args: MokChangeArgs) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::mok_change().print();
    }

    let sys = ctx.subsystem().await?;
    let identity = sys.keys.require(ctx.identity_name(args.name.as_deref()))?;
    let secret = prompt_secret(args.root_pw)?;
    let output = sys.enrollment.import(&identity, &secret).await?;

    report(&ctx, "import", Some(&identity.name), output)?;
    Ok(())
}

async fn delete(ctx: Context, args: MokChangeArgs) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::mok_change().print();
    }

    let sys = ctx.subsystem().await?;
    let identity = sys.keys.require(ctx.identity_name(args.name.as_deref()))?;
    let secret = prompt_secret(args.root_pw)?;
    let output = sys.enrollment.delete(&identity, &secret).await?;

    report(&ctx, "delete", Some(&identity.name), output)?;
    Ok(())
}

async fn reset(ctx: Context, root_pw: bool, yes: bool) -> Result<()> {
    if ctx.explain_enabled() {
        Explain::mok_change().print();
    }

    if !yes
        && !Confirm::new()
            .with_prompt("Remove every enrolled Machine Owner Key at next boot?")
            .default(false)
            .interact()?
    {
        println!("{}", "Aborted.".dimmed());
        return Ok(());
    }

    let sys = ctx.subsystem().await?;
    let secret = prompt_secret(root_pw)?;
    let output = sys.enrollment.reset(&secret).await?;

    report(&ctx, "reset", None, output)?;
    Ok(())
}

fn prompt_secret(root_pw: bool) -> Result<EnrollmentSecret> {
    if root_pw {
        return Ok(EnrollmentSecret::RootPassword);
    }
    eprintln!("Choose a one-time password. You will type it again in the MOK manager at next boot.");
    let password = Password::new()
        .with_prompt("One-time password")
        .with_confirmation("Repeat password", "Passwords do not match")
        .interact()?;
    if password.is_empty() {
        anyhow::bail!("the one-time password cannot be empty");
    }
    Ok(EnrollmentSecret::OneTimePassword(password))
}

fn report(ctx: &Context, action: &str, identity: Option<&str>, output: String) -> Result<()> {
    let outcome = ChangeOutcome { action, identity, output };
    if ctx.output_format.emit(&outcome)? {
        return Ok(());
    }

    println!("{} {} request queued.", "Success:".green().bold(), action);
    if !outcome.output.trim().is_empty() {
        println!("{}", outcome.output.trim().dimmed());
    }
    println!();
    println!("{}", "Next boot:".bold());
    println!("  1. The MOK manager (blue screen) appears before the boot menu");
    println!("  2. Choose the pending change and confirm it");
    println!("  3. Enter the same password (one-time or root), then reboot");
    Ok(())
}
