//! sbtrust - Secure Boot trust chain manager
//!
//! Keeps custom kernels bootable under UEFI Secure Boot.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    sbtrust_cli::run().await
}
