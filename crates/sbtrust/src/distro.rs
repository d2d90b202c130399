//! Distribution identity and packaging quirks.

use std::sync::Arc;
use tracing::{debug, instrument};

use sbtrust_core::{DistroInfo, InitrdTool, PackageTool, PackagingPolicy};

use crate::config::HostPaths;
use crate::exec::{CommandRunner, Invocation};

/// Ubuntu-family releases from which kernel packages ship compressed modules.
const UBUNTU_FAMILY_COMPRESSING: &[(&str, u32)] = &[
    ("ubuntu", 24),
    ("linuxmint", 22),
    ("elementary", 8),
    ("pop", 24),
];

/// Red Hat family ids; all of them compress modules during packaging.
const FEDORA_FAMILY: &[&str] = &["fedora", "rhel", "centos", "rocky", "almalinux"];

/// Reads the distribution identity and derives its packaging policy.
pub struct DistributionPolicy {
    runner: Arc<dyn CommandRunner>,
    paths: HostPaths,
}

impl DistributionPolicy {
    pub fn new(runner: Arc<dyn CommandRunner>, paths: HostPaths) -> Self {
        Self { runner, paths }
    }

    /// Distribution identity from os-release, falling back to `lsb_release -a`.
    pub async fn detect(&self) -> DistroInfo {
        match tokio::fs::read_to_string(&self.paths.os_release).await {
            Ok(text) => {
                let info = parse_os_release(&text);
                if !info.id.is_empty() {
                    return info;
                }
            }
            Err(e) => debug!(path = %self.paths.os_release.display(), error = %e, "os-release unreadable"),
        }

        match self.runner.run(&Invocation::new("lsb_release").arg("-a")).await {
            Ok(out) if out.success() => parse_lsb_release(&out.stdout),
            Ok(out) => {
                debug!(status = %out.status_text(), "lsb_release failed");
                DistroInfo::default()
            }
            Err(e) => {
                debug!(error = %e, "lsb_release unavailable");
                DistroInfo::default()
            }
        }
    }

    /// Packaging policy of the running distribution.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> PackagingPolicy {
        let info = self.detect().await;
        let policy = policy_for(&info);
        debug!(
            distro = %info.id,
            version = %info.version_id,
            sign_after_packaging = policy.sign_after_packaging,
            "resolved packaging policy"
        );
        policy
    }
}

/// Packaging policy of `info`. Pure function of id, `ID_LIKE` and major version.
#[must_use]
pub fn policy_for(info: &DistroInfo) -> PackagingPolicy {
    let major = info.major_version();

    if is_fedora_family(info) {
        return PackagingPolicy {
            compresses_modules_by_default: true,
            sign_after_packaging: true,
            initrd_tool: InitrdTool::Dracut,
            package_tool: PackageTool::Rpm,
        };
    }

    if info.is_like("ubuntu") || info.is_like("debian") {
        let compresses = UBUNTU_FAMILY_COMPRESSING
            .iter()
            .find(|(id, _)| *id == info.id)
            .is_some_and(|(_, min)| major.is_some_and(|m| m >= *min));
        return PackagingPolicy {
            compresses_modules_by_default: compresses,
            sign_after_packaging: compresses,
            initrd_tool: InitrdTool::InitramfsTools,
            package_tool: PackageTool::Dpkg,
        };
    }

    if info.is_like("arch") {
        return PackagingPolicy {
            compresses_modules_by_default: false,
            sign_after_packaging: false,
            initrd_tool: InitrdTool::Mkinitcpio,
            package_tool: PackageTool::Pacman,
        };
    }

    if info.is_like("suse") || info.id.starts_with("opensuse") {
        return PackagingPolicy {
            compresses_modules_by_default: false,
            sign_after_packaging: false,
            initrd_tool: InitrdTool::Dracut,
            package_tool: PackageTool::Rpm,
        };
    }

    PackagingPolicy {
        compresses_modules_by_default: false,
        sign_after_packaging: false,
        initrd_tool: InitrdTool::InitramfsTools,
        package_tool: PackageTool::Dpkg,
    }
}

fn is_fedora_family(info: &DistroInfo) -> bool {
    FEDORA_FAMILY.iter().any(|f| info.is_like(f))
}

/// Parse `/etc/os-release`.
#[must_use]
pub fn parse_os_release(text: &str) -> DistroInfo {
    let mut info = DistroInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        match key {
            "ID" => info.id = value.to_lowercase(),
            "ID_LIKE" => {
                info.id_like = value
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect();
            }
            "VERSION_ID" => info.version_id = value.to_string(),
            "NAME" => info.name = value.to_string(),
            "VERSION_CODENAME" if !value.is_empty() => info.codename = Some(value.to_string()),
            _ => {}
        }
    }
    info
}

/// Parse `lsb_release -a` output.
#[must_use]
pub fn parse_lsb_release(text: &str) -> DistroInfo {
    let mut info = DistroInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Distributor ID" => info.id = value.to_lowercase(),
            "Release" => info.version_id = value.to_string(),
            "Description" => info.name = value.to_string(),
            "Codename" if value != "n/a" => info.codename = Some(value.to_string()),
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::FakeRunner;
    use crate::exec::CommandOutput;

    fn distro(id: &str, like: &[&str], version: &str) -> DistroInfo {
        DistroInfo {
            id: id.into(),
            id_like: like.iter().map(ToString::to_string).collect(),
            version_id: version.into(),
            ..DistroInfo::default()
        }
    }

    #[test]
    fn ubuntu_family_thresholds() {
        assert!(policy_for(&distro("ubuntu", &["debian"], "24.04")).sign_after_packaging);
        assert!(!policy_for(&distro("ubuntu", &["debian"], "22.04")).sign_after_packaging);
        assert!(policy_for(&distro("linuxmint", &["ubuntu", "debian"], "22")).compresses_modules_by_default);
        assert!(!policy_for(&distro("linuxmint", &["ubuntu", "debian"], "21.3")).compresses_modules_by_default);
        assert!(policy_for(&distro("elementary", &["ubuntu"], "8")).sign_after_packaging);
        assert!(!policy_for(&distro("elementary", &["ubuntu"], "7.1")).sign_after_packaging);
    }

    #[test]
    fn fedora_family_signs_after_packaging() {
        let p = policy_for(&distro("fedora", &[], "40"));
        assert!(p.sign_after_packaging);
        assert_eq!(p.initrd_tool, InitrdTool::Dracut);
        assert_eq!(p.package_tool, PackageTool::Rpm);
        assert!(policy_for(&distro("rocky", &["rhel", "centos", "fedora"], "9.4")).sign_after_packaging);
    }

    #[test]
    fn debian_and_others_sign_before_packaging() {
        let p = policy_for(&distro("debian", &[], "12"));
        assert!(!p.sign_after_packaging);
        assert_eq!(p.initrd_tool, InitrdTool::InitramfsTools);
        let arch = policy_for(&distro("arch", &[], ""));
        assert!(!arch.sign_after_packaging);
        assert_eq!(arch.package_tool, PackageTool::Pacman);
        assert!(!policy_for(&DistroInfo::default()).sign_after_packaging);
    }

    #[test]
    fn parses_os_release() {
        let info = parse_os_release(
            "NAME=\"Linux Mint\"\nVERSION_ID=\"22\"\nID=linuxmint\nID_LIKE=\"ubuntu debian\"\nVERSION_CODENAME=wilma\n",
        );
        assert_eq!(info.id, "linuxmint");
        assert_eq!(info.id_like, vec!["ubuntu", "debian"]);
        assert_eq!(info.major_version(), Some(22));
        assert_eq!(info.codename.as_deref(), Some("wilma"));
    }

    #[tokio::test]
    async fn falls_back_to_lsb_release() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().with_tools(&["lsb_release"]));
        runner.script(
            "lsb_release",
            &["-a"],
            CommandOutput::ok("Distributor ID:\tUbuntu\nDescription:\tUbuntu 24.04 LTS\nRelease:\t24.04\nCodename:\tnoble\n"),
        );
        let policy = DistributionPolicy::new(runner, HostPaths::rooted_at(root.path()));
        let info = policy.detect().await;
        assert_eq!(info.id, "ubuntu");
        assert!(policy.resolve().await.sign_after_packaging);
    }
}
