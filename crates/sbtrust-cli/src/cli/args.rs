//! Command-line argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputFormat;

/// Secure Boot trust chain manager for custom Linux kernels
///
/// Sign your kernels, enroll your key, and find out why a kernel will not boot.
/// Use --explain on any command to learn what it does.
#[derive(Parser, Debug)]
#[command(name = "sbtrust")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "SBTRUST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    /// Explain what this command does (educational mode)
    #[arg(long, global = true)]
    pub explain: bool,

    /// Log to stderr as well as the debug log
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Firmware trust state and installed tools
    Status,

    /// Find out why a custom kernel may not boot, and how to fix it
    Diagnose,

    /// List custom (non-distribution) kernels and their artifacts
    Kernels,

    /// Manage signing identities
    Keys(KeysArgs),

    /// Machine Owner Key enrollment
    Mok(MokArgs),

    /// Sign a kernel's modules and boot image, or a single module
    Sign(SignArgs),

    /// Check whether a kernel or a single module is signed
    Verify(VerifyArgs),

    /// Audit trail of state-changing operations
    History(HistoryArgs),

    /// Check external tool dependencies
    Deps,

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Privileged helper (started by the privilege launcher)
    #[command(hide = true)]
    Helper,
}

// ============================================================================
// Keys command
// ============================================================================

#[derive(Args, Debug)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommands,
}

#[derive(Subcommand, Debug)]
pub enum KeysCommands {
    /// Generate a signing identity (replaces one with the same name)
    Generate {
        /// Identity name (defaults to the configured identity)
        #[arg(short, long)]
        name: Option<String>,

        /// Certificate common name
        #[arg(long)]
        common_name: Option<String>,
    },

    /// List stored identities
    List,

    /// Show an identity's certificate
    Show {
        /// Identity name (defaults to the configured identity)
        name: Option<String>,
    },
}

// ============================================================================
// MOK command
// ============================================================================

#[derive(Args, Debug)]
pub struct MokArgs {
    #[command(subcommand)]
    pub command: MokCommands,
}

#[derive(Subcommand, Debug)]
pub enum MokCommands {
    /// List enrolled and pending keys
    List,

    /// Whether one of our identities is enrolled
    Status,

    /// Queue an identity's certificate for enrollment
    Import(MokChangeArgs),

    /// Queue an identity's certificate for removal
    Delete(MokChangeArgs),

    /// Queue removal of every enrolled key
    Reset {
        /// Authorize with the root password instead of a one-time password
        #[arg(long)]
        root_pw: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct MokChangeArgs {
    /// Identity name (defaults to the configured identity)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Authorize with the root password instead of a one-time password
    #[arg(long)]
    pub root_pw: bool,
}

// ============================================================================
// Sign command
// ============================================================================

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Kernel release (as in /lib/modules/<version>)
    #[arg(value_name = "VERSION", required_unless_present = "module")]
    pub kernel: Option<String>,

    /// Sign one module file instead of a whole kernel
    #[arg(long, value_name = "PATH", conflicts_with_all = ["staged", "no_boot_image"])]
    pub module: Option<PathBuf>,

    /// Identity to sign with (defaults to the configured identity)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Sign modules only
    #[arg(long)]
    pub no_boot_image: bool,

    /// Sign a package staging root instead of the installed kernel
    #[arg(long, value_name = "ROOT")]
    pub staged: Option<PathBuf>,

    /// Batch timeout in seconds (overrides configuration)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

// ============================================================================
// Verify command
// ============================================================================

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Kernel release
    #[arg(value_name = "VERSION", required_unless_present = "module")]
    pub kernel: Option<String>,

    /// Check one module file instead of sampling a kernel
    #[arg(long, value_name = "PATH", conflicts_with_all = ["kernel", "sample_size"])]
    pub module: Option<PathBuf>,

    /// Modules to sample (overrides configuration)
    #[arg(short, long)]
    pub sample_size: Option<usize>,

    /// Identity whose certificate the boot image is checked against
    #[arg(short, long)]
    pub name: Option<String>,
}

// ============================================================================
// History command
// ============================================================================

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub command: Option<HistoryCommands>,

    /// Most recent entries to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// Delete the audit trail
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

// ============================================================================
// Config command
// ============================================================================

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Key to set (e.g., identity_name, sample_size)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,
}
