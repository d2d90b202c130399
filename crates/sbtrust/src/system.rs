//! Host readiness: installed tools and a combined system summary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use sbtrust_core::{DistroInfo, PackagingPolicy, TrustState};

use crate::config::HostPaths;
use crate::distro::{policy_for, DistributionPolicy};
use crate::exec::tools::find_sign_file;
use crate::exec::CommandRunner;
use crate::probe::PlatformTrustProbe;

/// Tools the subsystem shells out to, with what each is used for.
pub const DEPENDENCIES: &[(&str, &str)] = &[
    ("mokutil", "Secure Boot state and MOK enrollment"),
    ("openssl", "signing key generation"),
    ("modinfo", "module signature checks"),
    ("sign-file", "module signing"),
    ("sbsign", "boot image signing"),
    ("sbverify", "boot image verification"),
    ("xz", "xz-compressed modules"),
    ("gzip", "gzip-compressed modules"),
    ("zstd", "zstd-compressed modules"),
];

/// Availability of one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub purpose: String,
    pub installed: bool,
    /// Where it was found
    pub path: Option<PathBuf>,
}

/// Result of [`check_dependencies`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub all_installed: bool,
    pub dependencies: Vec<DependencyStatus>,
    /// Names of the missing tools
    pub missing: Vec<String>,
}

/// Everything the status screen shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub is_uefi: bool,
    pub trust_state: TrustState,
    pub setup_mode: bool,
    pub running_kernel: Option<String>,
    pub distro: DistroInfo,
    pub packaging: PackagingPolicy,
    pub dependencies: DependencyReport,
}

/// Release of the running kernel, from `/proc`.
#[must_use]
pub fn running_kernel() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Check every tool in [`DEPENDENCIES`]. `sign-file` is looked up for
/// `kernel_version` first, then on `PATH`.
#[must_use]
pub fn check_dependencies(
    runner: &dyn CommandRunner,
    paths: &HostPaths,
    kernel_version: Option<&str>,
) -> DependencyReport {
    let dependencies: Vec<DependencyStatus> = DEPENDENCIES
        .iter()
        .map(|(name, purpose)| {
            let path = match (*name, kernel_version) {
                ("sign-file", Some(version)) => find_sign_file(runner, paths, version).ok(),
                _ => runner.locate(name),
            };
            DependencyStatus {
                name: (*name).to_string(),
                purpose: (*purpose).to_string(),
                installed: path.is_some(),
                path,
            }
        })
        .collect();
    let missing: Vec<String> = dependencies
        .iter()
        .filter(|d| !d.installed)
        .map(|d| d.name.clone())
        .collect();
    debug!(missing = ?missing, "checked dependencies");
    DependencyReport {
        all_installed: missing.is_empty(),
        dependencies,
        missing,
    }
}

/// Probe the platform and collect the status summary.
pub async fn system_info(
    probe: &PlatformTrustProbe,
    distro: &DistributionPolicy,
    runner: &dyn CommandRunner,
    paths: &HostPaths,
) -> SystemInfo {
    let trust_state = probe.probe().await;
    let distro_info = distro.detect().await;
    let running = running_kernel();
    SystemInfo {
        is_uefi: trust_state.is_uefi,
        setup_mode: trust_state.setup_mode,
        packaging: policy_for(&distro_info),
        dependencies: check_dependencies(runner, paths, running.as_deref()),
        running_kernel: running,
        distro: distro_info,
        trust_state,
    }
}

/// Whether freshly built kernels should be offered for signing: only when
/// the firmware is UEFI and Secure Boot is enforcing.
pub async fn should_prompt_for_signing(probe: &PlatformTrustProbe) -> bool {
    probe.probe().await.requires_signing()
}
