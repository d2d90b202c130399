//! Library settings and host filesystem layout.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sbtrust_core::{Result, TrustError};

/// Minimum signed ratio for a kernel's module sample to count as signed.
pub const MODULE_SIGNED_THRESHOLD: f64 = 0.95;

/// Minimum signed ratio for an initrd's module sample.
///
/// Much looser than [`MODULE_SIGNED_THRESHOLD`]; an initrd built before the
/// modules were signed legitimately mixes both until it is regenerated.
pub const INITRD_SIGNED_THRESHOLD: f64 = 0.5;

/// Modules checked per kernel when sampling.
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// Audit-trail entries kept on disk.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Subject markers our identities have carried over time.
pub const DEFAULT_IDENTITY_MARKERS: &[&str] = &["Kernel Module Signing Key", "KernelCustom"];

/// Settings for every component of the trust chain manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root for keys, history and the debug log. `~` is expanded by the CLI.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Identity used when a command does not name one.
    #[serde(default = "default_identity_name")]
    pub identity_name: String,

    /// Modules sampled per kernel.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Signed-ratio threshold for module samples.
    #[serde(default = "default_module_threshold")]
    pub module_threshold: f64,

    /// Signed-ratio threshold for initrd samples.
    #[serde(default = "default_initrd_threshold")]
    pub initrd_threshold: f64,

    /// Upper bound for one signing batch, authentication included (seconds).
    #[serde(default = "default_signing_timeout")]
    pub signing_timeout_secs: u64,

    /// Upper bound for other privileged operations (seconds).
    #[serde(default = "default_privileged_timeout")]
    pub privileged_timeout_secs: u64,

    /// Audit-trail entries kept.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Program that elevates the privileged helper.
    #[serde(default = "default_launcher")]
    pub launcher: String,

    /// Historical subject markers identifying our enrolled keys.
    #[serde(default = "default_identity_markers")]
    pub identity_markers: Vec<String>,

    /// Where the host exposes firmware, modules and boot images.
    #[serde(default)]
    pub paths: HostPaths,
}

/// Host filesystem locations; overridable for chroots and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPaths {
    /// UEFI presence marker.
    #[serde(default = "default_efi_dir")]
    pub efi_dir: PathBuf,
    /// UEFI runtime variables.
    #[serde(default = "default_efivars_dir")]
    pub efivars_dir: PathBuf,
    /// Distribution identity file.
    #[serde(default = "default_os_release")]
    pub os_release: PathBuf,
    /// Per-kernel module trees.
    #[serde(default = "default_modules_root")]
    pub modules_root: PathBuf,
    /// Boot images and initrds.
    #[serde(default = "default_boot_dir")]
    pub boot_dir: PathBuf,
    /// Kernel header trees (`linux-headers-*`, `kernels/*`).
    #[serde(default = "default_usr_src")]
    pub usr_src: PathBuf,
    /// Kbuild trees (`linux-kbuild-*`).
    #[serde(default = "default_usr_lib")]
    pub usr_lib: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            identity_name: default_identity_name(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            module_threshold: MODULE_SIGNED_THRESHOLD,
            initrd_threshold: INITRD_SIGNED_THRESHOLD,
            signing_timeout_secs: default_signing_timeout(),
            privileged_timeout_secs: default_privileged_timeout(),
            history_cap: DEFAULT_HISTORY_CAP,
            launcher: default_launcher(),
            identity_markers: default_identity_markers(),
            paths: HostPaths::default(),
        }
    }
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            efi_dir: default_efi_dir(),
            efivars_dir: default_efivars_dir(),
            os_release: default_os_release(),
            modules_root: default_modules_root(),
            boot_dir: default_boot_dir(),
            usr_src: default_usr_src(),
            usr_lib: default_usr_lib(),
        }
    }
}

impl HostPaths {
    /// Layout rooted at `root` instead of `/` (chroot or test fixture).
    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            efi_dir: root.join("sys/firmware/efi"),
            efivars_dir: root.join("sys/firmware/efi/efivars"),
            os_release: root.join("etc/os-release"),
            modules_root: root.join("lib/modules"),
            boot_dir: root.join("boot"),
            usr_src: root.join("usr/src"),
            usr_lib: root.join("usr/lib"),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Config` if the file exists but cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| TrustError::io(path, e))?;
            let settings: Self =
                toml::from_str(&content).map_err(|e| TrustError::Config(e.to_string()))?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the sampler and signer cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("module_threshold", self.module_threshold),
            ("initrd_threshold", self.initrd_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TrustError::Config(format!(
                    "{name} must be between 0.0 and 1.0, got {value}"
                )));
            }
        }
        if self.sample_size == 0 {
            return Err(TrustError::Config("sample_size must be at least 1".into()));
        }
        if self.history_cap == 0 {
            return Err(TrustError::Config("history_cap must be at least 1".into()));
        }
        Ok(())
    }

    /// Directory holding signing identities.
    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.state_dir.join("keys")
    }

    /// Persisted audit trail.
    #[must_use]
    pub fn history_file(&self) -> PathBuf {
        self.state_dir.join("secureboot_history.json")
    }

    /// Plaintext debug log.
    #[must_use]
    pub fn debug_log(&self) -> PathBuf {
        self.state_dir.join("debug.log")
    }

    /// Signing batch timeout.
    #[must_use]
    pub const fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.signing_timeout_secs)
    }

    /// Timeout for listing/import/delete/reset.
    #[must_use]
    pub const fn privileged_timeout(&self) -> Duration {
        Duration::from_secs(self.privileged_timeout_secs)
    }
}

// Default value functions for serde.
fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("sbtrust")
}

fn default_identity_name() -> String {
    String::from("MOK")
}

const fn default_sample_size() -> usize {
    DEFAULT_SAMPLE_SIZE
}

const fn default_module_threshold() -> f64 {
    MODULE_SIGNED_THRESHOLD
}

const fn default_initrd_threshold() -> f64 {
    INITRD_SIGNED_THRESHOLD
}

const fn default_signing_timeout() -> u64 {
    30 * 60
}

const fn default_privileged_timeout() -> u64 {
    5 * 60
}

const fn default_history_cap() -> usize {
    DEFAULT_HISTORY_CAP
}

fn default_launcher() -> String {
    String::from("pkexec")
}

fn default_identity_markers() -> Vec<String> {
    DEFAULT_IDENTITY_MARKERS
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_efi_dir() -> PathBuf {
    PathBuf::from("/sys/firmware/efi")
}

fn default_efivars_dir() -> PathBuf {
    PathBuf::from("/sys/firmware/efi/efivars")
}

fn default_os_release() -> PathBuf {
    PathBuf::from("/etc/os-release")
}

fn default_modules_root() -> PathBuf {
    PathBuf::from("/lib/modules")
}

fn default_boot_dir() -> PathBuf {
    PathBuf::from("/boot")
}

fn default_usr_src() -> PathBuf {
    PathBuf::from("/usr/src")
}

fn default_usr_lib() -> PathBuf {
    PathBuf::from("/usr/lib")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.identity_name, "MOK");
        assert_eq!(s.sample_size, 20);
        assert!((s.module_threshold - 0.95).abs() < f64::EPSILON);
        assert!((s.initrd_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(s.history_cap, 100);
        assert_eq!(s.paths.efi_dir, PathBuf::from("/sys/firmware/efi"));
        assert!(s.history_file().ends_with("secureboot_history.json"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let s: Settings = toml::from_str(
            r#"
            sample_size = 8
            [paths]
            boot_dir = "/mnt/boot"
            "#,
        )
        .unwrap();
        assert_eq!(s.sample_size, 8);
        assert_eq!(s.paths.boot_dir, PathBuf::from("/mnt/boot"));
        assert_eq!(s.paths.modules_root, PathBuf::from("/lib/modules"));
        assert_eq!(s.launcher, "pkexec");
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let s = Settings {
            module_threshold: 1.5,
            ..Settings::default()
        };
        assert!(matches!(s.validate(), Err(TrustError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(s.identity_name, "MOK");
    }
}
