//! Platform trust state detection.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

use sbtrust_core::{DetectionMethod, TrustState};

use crate::config::HostPaths;
use crate::exec::{CommandRunner, Invocation};

/// EFI global variable GUID.
pub const EFI_GLOBAL_GUID: &str = "8be4df61-93ca-11d2-aa0d-00e098032b8c";

/// Reads UEFI and Secure Boot state, layering several detection methods.
pub struct PlatformTrustProbe {
    runner: Arc<dyn CommandRunner>,
    paths: HostPaths,
}

impl PlatformTrustProbe {
    /// Create a probe for the given host layout.
    pub fn new(runner: Arc<dyn CommandRunner>, paths: HostPaths) -> Self {
        Self { runner, paths }
    }

    /// Probe the platform. Never cached; the first method that answers wins.
    #[instrument(skip(self))]
    pub async fn probe(&self) -> TrustState {
        if !self.paths.efi_dir.is_dir() {
            debug!(path = %self.paths.efi_dir.display(), "no UEFI directory");
            return TrustState::not_uefi();
        }

        let setup_mode = self.read_flag("SetupMode").await.unwrap_or(false);

        let detected = match self.from_mokutil().await {
            Some(found) => Some(found),
            None => match self.read_flag("SecureBoot").await {
                Some(enabled) => Some((
                    enabled,
                    DetectionMethod::EfiVariable,
                    format!("SecureBoot-{EFI_GLOBAL_GUID} = {}", u8::from(enabled)),
                )),
                None => self.from_bootctl().await,
            },
        };

        let state = match detected {
            Some((enabled, method, details)) => TrustState {
                is_uefi: true,
                secure_boot_enabled: enabled,
                setup_mode,
                detection_method: method,
                details,
            },
            None => TrustState {
                is_uefi: true,
                secure_boot_enabled: false,
                setup_mode,
                detection_method: DetectionMethod::UnableToDetect,
                details: "No detection method could read the Secure Boot state".to_string(),
            },
        };
        debug!(
            enabled = state.secure_boot_enabled,
            method = %state.detection_method,
            setup_mode = state.setup_mode,
            "probed trust state"
        );
        state
    }

    async fn from_mokutil(&self) -> Option<(bool, DetectionMethod, String)> {
        if !self.runner.is_available("mokutil") {
            return None;
        }
        let out = self
            .runner
            .run(&Invocation::new("mokutil").arg("--sb-state"))
            .await
            .ok()?;
        let text = format!("{}{}", out.stdout, out.stderr);
        let enabled = if text.contains("SecureBoot enabled") {
            true
        } else if text.contains("SecureBoot disabled") {
            false
        } else {
            return None;
        };
        Some((enabled, DetectionMethod::Mokutil, text.trim().to_string()))
    }

    async fn from_bootctl(&self) -> Option<(bool, DetectionMethod, String)> {
        if !self.runner.is_available("bootctl") {
            return None;
        }
        let out = self
            .runner
            .run(&Invocation::new("bootctl").arg("status"))
            .await
            .ok()?;
        let line = out.stdout.lines().find(|l| l.contains("Secure Boot"))?;
        let enabled = line.to_lowercase().contains("enabled");
        Some((enabled, DetectionMethod::Bootctl, line.trim().to_string()))
    }

    async fn read_flag(&self, variable: &str) -> Option<bool> {
        read_efivar_flag(&self.paths.efivars_dir, variable).await
    }
}

/// Read a one-byte boolean EFI variable. The first four bytes of an efivarfs
/// file are attribute flags; the value is the last byte.
pub async fn read_efivar_flag(efivars_dir: &Path, variable: &str) -> Option<bool> {
    let path = efivars_dir.join(format!("{variable}-{EFI_GLOBAL_GUID}"));
    match tokio::fs::read(&path).await {
        Ok(bytes) => bytes.last().map(|b| *b == 1),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "efivar not readable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::FakeRunner;
    use crate::exec::CommandOutput;

    fn host() -> (tempfile::TempDir, HostPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted_at(dir.path());
        (dir, paths)
    }

    fn write_var(paths: &HostPaths, name: &str, value: u8) {
        std::fs::create_dir_all(&paths.efivars_dir).unwrap();
        std::fs::write(
            paths.efivars_dir.join(format!("{name}-{EFI_GLOBAL_GUID}")),
            [0x06, 0x00, 0x00, 0x00, value],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn no_uefi_short_circuits() {
        let (_dir, paths) = host();
        let runner = Arc::new(FakeRunner::new().with_all_tools());
        let probe = PlatformTrustProbe::new(runner.clone(), paths);

        let state = probe.probe().await;
        assert!(!state.is_uefi);
        assert!(!state.secure_boot_enabled);
        assert!(!state.setup_mode);
        assert_eq!(state.detection_method, DetectionMethod::NoUefi);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn mokutil_wins_when_available() {
        let (_dir, paths) = host();
        write_var(&paths, "SecureBoot", 0);
        let runner = Arc::new(FakeRunner::new().with_tools(&["mokutil"]));
        runner.script("mokutil", &["--sb-state"], CommandOutput::ok("SecureBoot enabled\n"));

        let state = PlatformTrustProbe::new(runner, paths).probe().await;
        assert!(state.secure_boot_enabled);
        assert_eq!(state.detection_method, DetectionMethod::Mokutil);
    }

    #[tokio::test]
    async fn efivar_last_byte_is_the_flag() {
        let (_dir, paths) = host();
        write_var(&paths, "SecureBoot", 1);
        write_var(&paths, "SetupMode", 0);

        let state = PlatformTrustProbe::new(Arc::new(FakeRunner::new()), paths)
            .probe()
            .await;
        assert!(state.is_uefi);
        assert!(state.secure_boot_enabled);
        assert!(!state.setup_mode);
        assert_eq!(state.detection_method, DetectionMethod::EfiVariable);
    }

    #[tokio::test]
    async fn unrecognized_mokutil_falls_through_to_bootctl() {
        let (_dir, paths) = host();
        std::fs::create_dir_all(&paths.efi_dir).unwrap();
        let runner = Arc::new(FakeRunner::new().with_tools(&["mokutil", "bootctl"]));
        runner.script(
            "mokutil",
            &["--sb-state"],
            CommandOutput::failed(255, "EFI variables are not supported on this system"),
        );
        runner.script(
            "bootctl",
            &["status"],
            CommandOutput::ok("System:\n  Secure Boot: disabled (setup)\n"),
        );

        let state = PlatformTrustProbe::new(runner, paths).probe().await;
        assert!(!state.secure_boot_enabled);
        assert_eq!(state.detection_method, DetectionMethod::Bootctl);
    }

    #[tokio::test]
    async fn nothing_answers_is_ambiguous() {
        let (_dir, paths) = host();
        std::fs::create_dir_all(&paths.efi_dir).unwrap();

        let state = PlatformTrustProbe::new(Arc::new(FakeRunner::new()), paths)
            .probe()
            .await;
        assert!(state.is_ambiguous());
        assert!(!state.secure_boot_enabled);
    }
}
