//! Privilege elevation.
//!
//! All root-only work (signing files under `/lib/modules` and `/boot`,
//! regenerating the initrd, changing MOK state) goes through a
//! [`PrivilegeBroker`]. Opening a session authenticates once; every
//! operation of a batch then runs inside that one session.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use sbtrust_core::Result;

use crate::config::Settings;
use crate::exec::CommandRunner;

pub mod helper;
pub mod local;
pub mod ops;
pub mod protocol;

pub use helper::{serve_stdio, HelperBroker};
pub use local::InProcessBroker;
pub use ops::OpExecutor;
pub use protocol::{HelperRequest, HelperResponse, MokAuth};

/// Opens authenticated sessions.
#[async_trait]
pub trait PrivilegeBroker: Send + Sync {
    /// Authenticate and return a session. Fails with `AuthDenied` if the
    /// operator refuses or dismisses the prompt.
    async fn open(&self) -> Result<Box<dyn ElevatedSession>>;
}

/// One authenticated context.
#[async_trait]
pub trait ElevatedSession: Send {
    /// Run one operation. Operation failures come back as
    /// [`HelperResponse::Failed`]; `Err` means the session itself broke.
    async fn call(&mut self, request: HelperRequest) -> Result<HelperResponse>;

    /// End the session.
    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Whether the effective user is root.
#[must_use]
pub fn is_root() -> bool {
    procfs::process::Process::myself()
        .and_then(|p| p.status())
        .map(|s| s.euid == 0)
        .unwrap_or_else(|e| {
            debug!(error = %e, "cannot read process status, assuming unprivileged");
            false
        })
}

/// Broker appropriate for this process: in-process when already root,
/// otherwise a helper started through the configured launcher.
///
/// # Errors
///
/// `Io` if the current executable cannot be determined.
pub fn broker_for(settings: &Settings, runner: Arc<dyn CommandRunner>) -> Result<Arc<dyn PrivilegeBroker>> {
    if is_root() {
        debug!("running as root, executing privileged operations in-process");
        Ok(Arc::new(InProcessBroker::new(Arc::new(OpExecutor::new(runner)))))
    } else {
        Ok(Arc::new(HelperBroker::for_current_exe(settings.launcher.clone())?))
    }
}
