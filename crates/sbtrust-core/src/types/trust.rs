use serde::{Deserialize, Serialize};

/// Which probe produced the Secure Boot verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// No UEFI firmware directory; nothing else was probed
    NoUefi,
    /// `mokutil --sb-state`
    Mokutil,
    /// Raw `SecureBoot` efivar
    EfiVariable,
    /// `bootctl status`
    Bootctl,
    /// Every method failed
    UnableToDetect,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoUefi => write!(f, "no-uefi"),
            Self::Mokutil => write!(f, "mokutil"),
            Self::EfiVariable => write!(f, "efivar"),
            Self::Bootctl => write!(f, "bootctl"),
            Self::UnableToDetect => write!(f, "unable-to-detect"),
        }
    }
}

/// Platform trust state, produced fresh by every probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustState {
    /// Firmware is UEFI
    pub is_uefi: bool,
    /// Secure Boot is enforcing
    pub secure_boot_enabled: bool,
    /// Firmware is in setup mode (key enrollment unrestricted)
    pub setup_mode: bool,
    /// Method that produced the verdict
    pub detection_method: DetectionMethod,
    /// Human-readable detail
    pub details: String,
}

impl TrustState {
    /// State for a legacy BIOS host.
    #[must_use]
    pub fn not_uefi() -> Self {
        Self {
            is_uefi: false,
            secure_boot_enabled: false,
            setup_mode: false,
            detection_method: DetectionMethod::NoUefi,
            details: "System is not using UEFI".to_string(),
        }
    }

    /// True when no probe method could read the Secure Boot flag.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.is_uefi && self.detection_method == DetectionMethod::UnableToDetect
    }

    /// Whether kernels built on this host need signing to boot.
    #[must_use]
    pub const fn requires_signing(&self) -> bool {
        self.is_uefi && self.secure_boot_enabled
    }
}
