//! # sbtrust-cli
//!
//! Command-line front end for the `sbtrust` Secure Boot trust chain manager.
//!
//! ## Features
//!
//! - **Status and diagnosis**: firmware trust state, enrollment, per-kernel signature checks
//! - **Key and MOK management**: generate identities, queue enrollment, delete, reset
//! - **Signing**: sign a kernel's modules and boot image with progress and Ctrl-C cancel
//! - **Educational mode**: `--explain` describes what a command does and which tools it runs
//! - **Multiple output formats**: Pretty tables, JSON, YAML

pub mod cli;
pub mod config;
pub mod education;
pub mod logging;
pub mod output;

pub use cli::run;
