//! Tool lookup helpers.

use std::path::PathBuf;
use tracing::debug;

use sbtrust_core::{Result, TrustError};

use super::CommandRunner;
use crate::artifacts::base_version;
use crate::config::HostPaths;

/// Resolve a required tool, failing fast with `ToolMissing`.
///
/// # Errors
///
/// Returns `TrustError::ToolMissing` if the tool cannot be found.
pub fn require_tool(runner: &dyn CommandRunner, tool: &str) -> Result<PathBuf> {
    runner
        .locate(tool)
        .ok_or_else(|| TrustError::tool_missing(tool))
}

/// Directories that may hold the kernel's `sign-file` helper, most specific first.
#[must_use]
pub fn sign_file_candidates(paths: &HostPaths, kernel_version: &str) -> Vec<PathBuf> {
    let base = base_version(kernel_version).unwrap_or(kernel_version);
    vec![
        paths
            .usr_src
            .join(format!("linux-headers-{kernel_version}"))
            .join("scripts/sign-file"),
        paths
            .usr_lib
            .join(format!("linux-kbuild-{base}"))
            .join("scripts/sign-file"),
        paths
            .modules_root
            .join(kernel_version)
            .join("build/scripts/sign-file"),
        paths
            .usr_src
            .join("kernels")
            .join(kernel_version)
            .join("scripts/sign-file"),
    ]
}

/// Locate `sign-file` for a kernel: header trees first, then `PATH`.
///
/// # Errors
///
/// Returns `TrustError::ToolMissing` if no candidate exists.
pub fn find_sign_file(
    runner: &dyn CommandRunner,
    paths: &HostPaths,
    kernel_version: &str,
) -> Result<PathBuf> {
    if let Some(found) = sign_file_candidates(paths, kernel_version)
        .into_iter()
        .find(|p| p.is_file())
    {
        debug!(path = %found.display(), kernel = kernel_version, "found sign-file");
        return Ok(found);
    }
    require_tool(runner, "sign-file")
}
