use serde::{Deserialize, Serialize};

use super::verification::SampleReport;

/// A specific signing problem found on one kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "problem")]
pub enum KernelProblem {
    /// Module sample fell below the module threshold
    UnsignedModules {
        /// Sample outcome
        sample: SampleReport,
    },
    /// Initrd module sample fell below the initrd threshold
    UnsignedInitrd {
        /// Sample outcome
        sample: SampleReport,
    },
    /// Boot image does not verify against our certificate
    UnsignedBootImage,
}

impl std::fmt::Display for KernelProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsignedModules { sample } => write!(
                f,
                "unsigned modules ({}/{} sampled modules signed)",
                sample.signed, sample.checked
            ),
            Self::UnsignedInitrd { sample } => write!(
                f,
                "initrd contains unsigned modules ({}/{} sampled modules signed)",
                sample.signed, sample.checked
            ),
            Self::UnsignedBootImage => write!(f, "boot image is not signed"),
        }
    }
}

/// Problems found on one custom kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelIssues {
    /// Kernel release
    pub kernel_version: String,
    /// Everything wrong with it
    pub problems: Vec<KernelProblem>,
}

/// Terminal state of the diagnosis state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "issue_type")]
pub enum Issue {
    /// Legacy BIOS boot
    NotUefi,
    /// UEFI present but no probe could read the Secure Boot flag
    DetectionAmbiguous,
    /// Secure Boot is off
    SbDisabled,
    /// A MOK enrollment request waits for the next boot
    MokPending,
    /// None of our identities is enrolled
    MokNotEnrolled,
    /// Custom kernels with unsigned artifacts
    KernelSignatureIssues {
        /// Per-kernel breakdown
        kernels: Vec<KernelIssues>,
    },
    /// Nothing to do
    Ok,
}

/// Entry point a caller can wire to a state's primary action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    /// Generate (if needed) and import the signing identity into MOK
    EnrollKey,
    /// Batch-sign the affected kernels
    SignKernels,
}

impl Issue {
    /// Fixed, ordered remediation steps for this state.
    #[must_use]
    pub fn solutions(&self) -> Vec<String> {
        let steps: &[&str] = match self {
            Self::NotUefi => &[
                "Convert the installation to UEFI boot (firmware setting plus an EFI system partition)",
                "Keep legacy BIOS boot: custom kernels boot without signatures",
            ],
            Self::DetectionAmbiguous => &[
                "Install mokutil so the Secure Boot state can be read",
                "Check the Secure Boot setting in the firmware setup screen",
                "Run the diagnosis again as root so efivars are readable",
            ],
            Self::SbDisabled => &[
                "Enable Secure Boot in the firmware setup, then sign and enroll",
                "Keep Secure Boot disabled and accept the reduced boot-chain protection",
            ],
            Self::MokPending => &[
                "Reboot and complete the enrollment in the MOK manager (blue screen) with the one-time password",
                "Cancel the pending request with 'mokutil --revoke-import' and enroll again",
            ],
            Self::MokNotEnrolled => &[
                "Enroll the signing key: generate it if needed, import it, then reboot and confirm",
                "Disable Secure Boot in the firmware setup",
            ],
            Self::KernelSignatureIssues { .. } => &[
                "Sign the affected kernels (modules and boot image)",
                "Regenerate the initrd so it embeds the signed modules",
                "Run the verification again to confirm",
            ],
            Self::Ok => &[],
        };
        steps.iter().map(ToString::to_string).collect()
    }

    /// Primary action button for this state, if any.
    #[must_use]
    pub const fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::MokNotEnrolled => Some(Remediation::EnrollKey),
            Self::KernelSignatureIssues { .. } => Some(Remediation::SignKernels),
            _ => None,
        }
    }

    /// Stable tag for serialization and log fields.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::NotUefi => "NOT_UEFI",
            Self::DetectionAmbiguous => "DETECTION_AMBIGUOUS",
            Self::SbDisabled => "SB_DISABLED",
            Self::MokPending => "MOK_PENDING",
            Self::MokNotEnrolled => "MOK_NOT_ENROLLED",
            Self::KernelSignatureIssues { .. } => "KERNEL_SIGNATURE_ISSUES",
            Self::Ok => "OK",
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Final output of the diagnosis pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    /// Terminal state, with per-kernel details when relevant
    pub issue: Issue,
    /// Summary for the operator
    pub message: String,
    /// Ordered remediation steps
    pub solutions: Vec<String>,
}

impl DiagnosisResult {
    /// Attach the state's fixed solutions to a message.
    #[must_use]
    pub fn new(issue: Issue, message: impl Into<String>) -> Self {
        let solutions = issue.solutions();
        Self {
            issue,
            message: message.into(),
            solutions,
        }
    }

    /// True when no action is needed.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.issue, Issue::Ok)
    }
}
