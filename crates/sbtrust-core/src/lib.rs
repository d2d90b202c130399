//! Core types and error taxonomy for `sbtrust`.
//!
//! This crate provides the foundational types shared by the Secure Boot
//! trust-and-signing library and its command-line front end:
//!
//! - **Types**: platform trust state, signing identities, MOK enrollment
//!   listings, kernel artifact sets, signing and sampling results, the
//!   diagnosis state machine's closed [`Issue`] enum, and history entries
//! - **Errors**: the [`TrustError`] taxonomy shared by every component
//!
//! # Example
//!
//! ```rust,ignore
//! use sbtrust_core::{DiagnosisResult, Issue};
//!
//! fn render(result: &DiagnosisResult) {
//!     match &result.issue {
//!         Issue::Ok => println!("all good"),
//!         Issue::KernelSignatureIssues { kernels } => {
//!             println!("{} kernel(s) need signing", kernels.len());
//!         }
//!         other => println!("{other}: {}", result.message),
//!     }
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/sbtrust-core/0.3.0")]

mod error;
pub mod types;

pub use error::{Result, TrustError};
pub use types::*;
