//! Diagnosis pipeline.
//!
//! Turns probe, enrollment and sampling results into one [`Issue`]. The
//! checks run in a fixed order and the first failing one wins, so the
//! operator always gets the most fundamental problem first:
//!
//! ```text
//! NotUefi -> DetectionAmbiguous -> SbDisabled -> MokPending
//!         -> MokNotEnrolled -> KernelSignatureIssues -> Ok
//! ```

use std::sync::Arc;
use tracing::{info, instrument, warn};

use sbtrust_core::{
    BootImageCheck, DiagnosisResult, EnrollmentStatus, Issue, KernelIssues, KernelProblem, Result,
    SigningIdentity, TrustState,
};

use crate::artifacts::{ArtifactLocator, KernelInventory};
use crate::enrollment::EnrollmentController;
use crate::keys::KeyManager;
use crate::probe::PlatformTrustProbe;
use crate::sampler::VerificationSampler;

/// Runs the ordered diagnosis.
pub struct DiagnosisEngine {
    probe: Arc<PlatformTrustProbe>,
    enrollment: Arc<EnrollmentController>,
    keys: Arc<KeyManager>,
    sampler: Arc<VerificationSampler>,
    inventory: Arc<KernelInventory>,
    locator: ArtifactLocator,
    sample_size: usize,
}

impl DiagnosisEngine {
    pub fn new(
        probe: Arc<PlatformTrustProbe>,
        enrollment: Arc<EnrollmentController>,
        keys: Arc<KeyManager>,
        sampler: Arc<VerificationSampler>,
        inventory: Arc<KernelInventory>,
        locator: ArtifactLocator,
        sample_size: usize,
    ) -> Self {
        Self {
            probe,
            enrollment,
            keys,
            sampler,
            inventory,
            locator,
            sample_size,
        }
    }

    /// Diagnose the host.
    ///
    /// # Errors
    ///
    /// Failures reading the MOK listing (`ToolMissing`, `AuthDenied`,
    /// `Timeout`) or sampling modules, since no verdict can be given
    /// without them.
    #[instrument(skip(self))]
    pub async fn diagnose(&self) -> Result<DiagnosisResult> {
        let state = self.probe.probe().await;
        if let Some(result) = platform_issue(&state) {
            info!(issue = %result.issue, "diagnosis finished");
            return Ok(result);
        }

        let identities = self.keys.list()?;
        let status = self.enrollment.status(&identities).await?;
        if let Some(result) = enrollment_issue(&status) {
            info!(issue = %result.issue, "diagnosis finished");
            return Ok(result);
        }

        let identity = matched_identity(&identities, &status);
        let mut affected = Vec::new();
        for kernel in self.inventory.custom_kernels(&self.locator).await? {
            let problems = self.kernel_problems(&kernel, identity).await?;
            if !problems.is_empty() {
                affected.push(KernelIssues {
                    kernel_version: kernel,
                    problems,
                });
            }
        }

        let result = if affected.is_empty() {
            DiagnosisResult::new(
                Issue::Ok,
                "Secure Boot is enabled, the signing key is enrolled and custom kernels are signed",
            )
        } else {
            let message = kernel_issues_message(&affected);
            DiagnosisResult::new(Issue::KernelSignatureIssues { kernels: affected }, message)
        };
        info!(issue = %result.issue, "diagnosis finished");
        Ok(result)
    }

    async fn kernel_problems(
        &self,
        kernel: &str,
        identity: Option<&SigningIdentity>,
    ) -> Result<Vec<KernelProblem>> {
        let mut problems = Vec::new();

        let sample = self.sampler.sample_kernel(kernel, self.sample_size).await?;
        if !sample.is_signed {
            problems.push(KernelProblem::UnsignedModules { sample });
        }

        match self.sampler.sample_initrd(kernel, self.sample_size).await {
            Ok(Some(sample)) if !sample.is_signed => problems.push(KernelProblem::UnsignedInitrd { sample }),
            Ok(_) => {}
            Err(e) => warn!(kernel, error = %e, "initrd not sampled"),
        }

        match self.sampler.check_boot_image(kernel, identity).await {
            BootImageCheck::Unsigned => problems.push(KernelProblem::UnsignedBootImage),
            BootImageCheck::Unavailable { reason } => {
                info!(kernel, reason = %reason, "boot image not verified");
            }
            BootImageCheck::Signed | BootImageCheck::Unsupported => {}
        }
        Ok(problems)
    }
}

fn platform_issue(state: &TrustState) -> Option<DiagnosisResult> {
    if !state.is_uefi {
        return Some(DiagnosisResult::new(
            Issue::NotUefi,
            "The system boots in legacy BIOS mode; Secure Boot does not apply",
        ));
    }
    if state.is_ambiguous() {
        return Some(DiagnosisResult::new(
            Issue::DetectionAmbiguous,
            format!("UEFI firmware detected but the Secure Boot state could not be read: {}", state.details),
        ));
    }
    if !state.secure_boot_enabled {
        return Some(DiagnosisResult::new(
            Issue::SbDisabled,
            "Secure Boot is disabled; custom kernels boot without signatures",
        ));
    }
    None
}

fn enrollment_issue(status: &EnrollmentStatus) -> Option<DiagnosisResult> {
    if status.pending {
        return Some(DiagnosisResult::new(
            Issue::MokPending,
            "A signing key is queued for enrollment; reboot and confirm it in the MOK manager",
        ));
    }
    if !status.enrolled {
        return Some(DiagnosisResult::new(
            Issue::MokNotEnrolled,
            "No signing key is enrolled; the firmware will reject custom kernels",
        ));
    }
    None
}

/// Identity to verify boot images with: the enrolled one, else the first usable.
fn matched_identity<'a>(
    identities: &'a [SigningIdentity],
    status: &EnrollmentStatus,
) -> Option<&'a SigningIdentity> {
    status
        .matched_identity_name
        .as_deref()
        .and_then(|name| identities.iter().find(|id| id.name == name))
        .or_else(|| identities.iter().find(|id| id.is_complete()))
}

fn kernel_issues_message(affected: &[KernelIssues]) -> String {
    let details: Vec<String> = affected
        .iter()
        .map(|k| {
            let problems: Vec<String> = k.problems.iter().map(ToString::to_string).collect();
            format!("{}: {}", k.kernel_version, problems.join("; "))
        })
        .collect();
    format!(
        "{} custom kernel(s) have signing problems:\n{}",
        affected.len(),
        details.join("\n")
    )
}
