//! # sbtrust
//!
//! Secure Boot trust chain manager for custom Linux kernels.
//!
//! A custom kernel only boots under UEFI Secure Boot when its modules and
//! boot image carry signatures from a key the firmware trusts. This crate
//! owns that chain end to end:
//!
//! - **Probe** -- is the firmware UEFI, is Secure Boot enforcing, is it in setup mode?
//! - **Keys** -- generate and store a self-signed code-signing identity
//! - **Enrollment** -- queue the identity into the Machine Owner Key list
//! - **Signing** -- sign a kernel's modules (through their compression) and boot image
//! - **Sampling** -- estimate whether a kernel, its initrd and its boot image are signed
//! - **Diagnosis** -- reduce all of the above to one actionable [`Issue`]
//!
//! ## Data Flow
//!
//! ```text
//! PlatformTrustProbe ──┐
//! EnrollmentController ┼─> DiagnosisEngine -> DiagnosisResult
//! VerificationSampler ─┘          │
//!                                 v  remediation
//! KeyManager -> EnrollmentController (enroll)
//!            -> SigningEngine -> PrivilegeBroker -> helper process (root)
//! ```
//!
//! All tools are run through a [`exec::CommandRunner`], and everything that
//! needs root goes through a [`privilege::PrivilegeBroker`] session. Every
//! state-changing operation is recorded in the [`history::HistoryLog`].

pub mod artifacts;
pub mod compress;
pub mod config;
pub mod diagnosis;
pub mod distro;
pub mod enrollment;
pub mod exec;
pub mod hash;
pub mod history;
pub mod keys;
pub mod privilege;
pub mod probe;
pub mod sampler;
pub mod signing;
pub mod system;

pub use sbtrust_core::*;

pub use artifacts::{ArtifactLocator, KernelInventory};
pub use config::{HostPaths, Settings};
pub use diagnosis::DiagnosisEngine;
pub use distro::DistributionPolicy;
pub use enrollment::EnrollmentController;
pub use exec::{CommandRunner, SystemRunner};
pub use history::HistoryLog;
pub use keys::KeyManager;
pub use privilege::PrivilegeBroker;
pub use probe::PlatformTrustProbe;
pub use sampler::VerificationSampler;
pub use signing::{CancelToken, SignRequest, SigningEngine};

use std::sync::Arc;
use tracing::debug;

/// Every component, wired from one [`Settings`].
pub struct Subsystem {
    pub settings: Settings,
    pub runner: Arc<dyn CommandRunner>,
    pub history: Arc<HistoryLog>,
    pub probe: Arc<PlatformTrustProbe>,
    pub keys: Arc<KeyManager>,
    pub enrollment: Arc<EnrollmentController>,
    pub locator: ArtifactLocator,
    pub distro: DistributionPolicy,
    pub policy: PackagingPolicy,
    pub inventory: Arc<KernelInventory>,
    pub sampler: Arc<VerificationSampler>,
    pub signing: SigningEngine,
    pub diagnosis: DiagnosisEngine,
}

impl Subsystem {
    /// Wire the components around `runner` and `broker`.
    ///
    /// Reads the distribution identity to pick the packaging policy.
    pub async fn new(
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
        broker: Arc<dyn PrivilegeBroker>,
    ) -> Self {
        let paths = settings.paths.clone();
        let history = Arc::new(HistoryLog::new(settings.history_file(), settings.history_cap));
        let probe = Arc::new(PlatformTrustProbe::new(Arc::clone(&runner), paths.clone()));
        let keys = Arc::new(KeyManager::new(
            Arc::clone(&runner),
            settings.keys_dir(),
            Arc::clone(&history),
        ));
        let enrollment = Arc::new(EnrollmentController::new(
            Arc::clone(&broker),
            Arc::clone(&runner),
            Arc::clone(&history),
            settings.identity_markers.clone(),
            settings.privileged_timeout(),
        ));

        let distro = DistributionPolicy::new(Arc::clone(&runner), paths.clone());
        let policy = distro.resolve().await;
        debug!(?policy, "packaging policy");

        let locator = ArtifactLocator::new(&paths);
        let inventory = Arc::new(KernelInventory::new(Arc::clone(&runner), policy.package_tool));
        let sampler = Arc::new(VerificationSampler::new(
            Arc::clone(&runner),
            locator.clone(),
            settings.module_threshold,
            settings.initrd_threshold,
        ));
        let signing = SigningEngine::new(
            Arc::clone(&runner),
            broker,
            Arc::clone(&keys),
            Arc::clone(&history),
            paths,
            policy,
            settings.signing_timeout(),
        );
        let diagnosis = DiagnosisEngine::new(
            Arc::clone(&probe),
            Arc::clone(&enrollment),
            Arc::clone(&keys),
            Arc::clone(&sampler),
            Arc::clone(&inventory),
            locator.clone(),
            settings.sample_size,
        );

        Self {
            settings,
            runner,
            history,
            probe,
            keys,
            enrollment,
            locator,
            distro,
            policy,
            inventory,
            sampler,
            signing,
            diagnosis,
        }
    }

    /// Components for the real host: system tools and the configured
    /// privilege launcher (or in-process execution when already root).
    ///
    /// # Errors
    ///
    /// `Config` for invalid settings, `Io` if the current executable
    /// cannot be located for the helper.
    pub async fn for_host(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let broker = privilege::broker_for(&settings, Arc::clone(&runner))?;
        Ok(Self::new(settings, runner, broker).await)
    }
}
