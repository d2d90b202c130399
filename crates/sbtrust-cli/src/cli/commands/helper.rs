//! `sbtrust helper` - privileged side of the helper protocol.
//!
//! Started as `<launcher> sbtrust helper`; reads requests from stdin and
//! answers on stdout until stdin closes.

use anyhow::Result;
use std::sync::Arc;

use sbtrust::privilege::{self, OpExecutor};
use sbtrust::SystemRunner;

pub async fn execute() -> Result<()> {
    if !privilege::is_root() {
        anyhow::bail!("the helper must run as root (it is started through the privilege launcher)");
    }
    let executor = OpExecutor::new(Arc::new(SystemRunner::new()));
    privilege::serve_stdio(&executor).await?;
    Ok(())
}
