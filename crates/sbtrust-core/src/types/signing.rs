use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TrustError;

/// Where the modules to sign live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "root")]
pub enum ArtifactSource {
    /// The live module tree and `/boot`
    Installed,
    /// A package staging root (`<root>/lib/modules`, `<root>/boot`) before packaging
    Staged(PathBuf),
}

impl ArtifactSource {
    /// True for the live tree.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        matches!(self, Self::Installed)
    }
}

/// One module that could not be signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningFailure {
    /// Module path
    pub path: PathBuf,
    /// Why it failed
    pub reason: String,
}

/// What happened to the boot image during a signing batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum BootImageOutcome {
    /// Boot-image signing was not requested
    NotRequested,
    /// Signed in place; `backup` is the preserved unsigned original
    Signed {
        /// Image that was signed
        path: PathBuf,
        /// Unsigned backup
        backup: PathBuf,
    },
    /// Informational skip (architecture, no image found)
    Skipped {
        /// Why
        reason: String,
    },
    /// Signing was attempted and failed
    Failed {
        /// Why
        reason: String,
    },
}

impl BootImageOutcome {
    /// Skip caused by an architecture without PE/COFF boot images.
    #[must_use]
    pub fn unsupported_arch(arch: &str) -> Self {
        Self::Skipped {
            reason: TrustError::ArchitectureUnsupported {
                arch: arch.to_string(),
            }
            .to_string(),
        }
    }

    /// Only an attempted-and-failed signing counts against the batch.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Initrd regeneration after signing the live tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum InitrdOutcome {
    /// Not applicable to this batch
    NotNeeded,
    /// Regenerated with the signed modules
    Rebuilt,
    /// Regeneration failed
    Failed {
        /// Why
        reason: String,
    },
}

/// Outcome of one `sign_kernel` invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningResult {
    /// Kernel release
    pub kernel_version: String,
    /// Modules attempted
    pub attempted: usize,
    /// Modules signed
    pub signed: usize,
    /// Modules that failed
    pub failed: usize,
    /// Per-module failure reasons
    pub failures: Vec<SigningFailure>,
    /// Boot image step
    pub boot_image: BootImageOutcome,
    /// Initrd step
    pub initrd: InitrdOutcome,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
    /// Postponed until the packaged kernel is installed
    pub deferred: bool,
}

impl SigningResult {
    /// Empty result for a kernel, before any module is attempted.
    #[must_use]
    pub fn new(kernel_version: impl Into<String>) -> Self {
        Self {
            kernel_version: kernel_version.into(),
            attempted: 0,
            signed: 0,
            failed: 0,
            failures: Vec::new(),
            boot_image: BootImageOutcome::NotRequested,
            initrd: InitrdOutcome::NotNeeded,
            cancelled: false,
            deferred: false,
        }
    }

    /// Record a module that signed cleanly.
    pub fn record_signed(&mut self) {
        self.attempted += 1;
        self.signed += 1;
    }

    /// Record a module failure.
    pub fn record_failure(&mut self, path: PathBuf, reason: impl Into<String>) {
        self.attempted += 1;
        self.failed += 1;
        self.failures.push(SigningFailure {
            path,
            reason: reason.into(),
        });
    }

    /// Every step that ran succeeded and nothing was cut short.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0
            && !self.cancelled
            && !self.boot_image.is_failure()
            && !matches!(self.initrd, InitrdOutcome::Failed { .. })
    }

    /// Convert a batch with module failures into [`TrustError::PartialBatchFailure`].
    ///
    /// # Errors
    ///
    /// Returns `PartialBatchFailure` when any module failed.
    pub fn ensure_complete(self) -> Result<Self, TrustError> {
        if self.failed > 0 {
            return Err(TrustError::PartialBatchFailure {
                attempted: self.attempted,
                failed: self.failed,
            });
        }
        Ok(self)
    }
}
