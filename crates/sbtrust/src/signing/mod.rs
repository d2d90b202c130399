//! Kernel signing batches.
//!
//! A batch signs every module of one kernel and, where the architecture
//! boots PE/COFF images, its boot image. All privileged work of a batch
//! runs inside a single elevated session, so the operator authenticates
//! once per kernel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use sbtrust_core::{
    ArtifactSource, BootImageMatch, BootImageOutcome, Compression, HistoryAction, InitrdOutcome,
    KernelArtifactSet, KernelModule, PackagingPolicy, Result, SigningIdentity, SigningResult,
    TrustError,
};

use crate::artifacts::ArtifactLocator;
use crate::config::HostPaths;
use crate::exec::tools::{find_sign_file, require_tool};
use crate::exec::CommandRunner;
use crate::history::HistoryLog;
use crate::keys::KeyManager;
use crate::privilege::ops::initrd_program;
use crate::privilege::{ElevatedSession, HelperRequest, HelperResponse, PrivilegeBroker};

pub mod control;

pub use control::{CancelToken, InFlight, KernelLease};

/// Architectures whose firmware boots PE/COFF kernel images.
pub const PE_COFF_ARCHES: &[&str] = &["x86_64", "x86", "i686", "i386", "amd64"];

/// Whether boot-image signing applies on `arch`.
#[must_use]
pub fn boot_image_signing_supported(arch: &str) -> bool {
    PE_COFF_ARCHES.contains(&arch)
}

/// Per-module progress: `(current, total, module name)`.
pub type ProgressFn<'a> = dyn Fn(usize, usize, &str) + Send + Sync + 'a;

/// What to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub kernel_version: String,
    /// Identity (under the keys directory) to sign with
    pub identity_name: String,
    pub source: ArtifactSource,
    pub sign_boot_image: bool,
}

impl SignRequest {
    /// Sign the installed modules and boot image of `kernel_version`.
    pub fn installed(kernel_version: impl Into<String>, identity_name: impl Into<String>) -> Self {
        Self {
            kernel_version: kernel_version.into(),
            identity_name: identity_name.into(),
            source: ArtifactSource::Installed,
            sign_boot_image: true,
        }
    }

    #[must_use]
    pub fn staged(mut self, root: impl Into<PathBuf>) -> Self {
        self.source = ArtifactSource::Staged(root.into());
        self
    }

    #[must_use]
    pub const fn without_boot_image(mut self) -> Self {
        self.sign_boot_image = false;
        self
    }
}

/// Tools and paths resolved before anything is touched.
struct Plan {
    identity: SigningIdentity,
    artifacts: KernelArtifactSet,
    sign_file: PathBuf,
    wants_boot_image: bool,
    boot_image: Option<BootImageMatch>,
    rebuild_initrd: bool,
    locator: ArtifactLocator,
}

/// Signs kernels with a stored identity.
pub struct SigningEngine {
    runner: Arc<dyn CommandRunner>,
    broker: Arc<dyn PrivilegeBroker>,
    keys: Arc<KeyManager>,
    history: Arc<HistoryLog>,
    paths: HostPaths,
    policy: PackagingPolicy,
    timeout: Duration,
    arch: String,
    in_flight: InFlight,
}

impl SigningEngine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        broker: Arc<dyn PrivilegeBroker>,
        keys: Arc<KeyManager>,
        history: Arc<HistoryLog>,
        paths: HostPaths,
        policy: PackagingPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            broker,
            keys,
            history,
            paths,
            policy,
            timeout,
            arch: std::env::consts::ARCH.to_string(),
            in_flight: InFlight::default(),
        }
    }

    /// Override the host architecture.
    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub const fn policy(&self) -> &PackagingPolicy {
        &self.policy
    }

    /// Whether a batch for `kernel_version` is running.
    pub fn is_signing(&self, kernel_version: &str) -> bool {
        self.in_flight.is_busy(kernel_version)
    }

    /// Sign one kernel.
    ///
    /// Module failures do not stop the batch; they are itemized in the
    /// result. Use [`SigningResult::ensure_complete`] to turn them into an
    /// error. A history entry is written whatever the outcome.
    ///
    /// # Errors
    ///
    /// `SigningInProgress` if the kernel is already being signed,
    /// `KeyMissing` or `ToolMissing` before any artifact is touched,
    /// `NotFound` without a module directory, `AuthDenied` if elevation is
    /// refused, `Timeout` if the batch overruns. The deadline is checked
    /// between privileged calls; a call already running is never cut short,
    /// so no module is left half-processed.
    #[instrument(skip(self, progress, cancel), fields(kernel = %request.kernel_version))]
    pub async fn sign_kernel(
        &self,
        request: &SignRequest,
        progress: Option<&ProgressFn<'_>>,
        cancel: &CancelToken,
    ) -> Result<SigningResult> {
        let _lease = self.in_flight.try_acquire(&request.kernel_version)?;
        let deadline = Instant::now() + self.timeout;

        let outcome = self.run_batch(request, progress, cancel, deadline).await;
        self.record(request, &outcome).await;
        outcome
    }

    /// Sign one module file outside a batch.
    ///
    /// `kernel_version` selects the `sign-file` build and the per-kernel
    /// guard; no initrd is regenerated.
    ///
    /// # Errors
    ///
    /// `NotFound` if `module` is not a kernel module file, `KeyMissing` or
    /// `ToolMissing` before it is touched, `SigningInProgress` while a batch
    /// runs for the same kernel, `AuthDenied` if elevation is refused.
    #[instrument(skip(self, module), fields(module = %module.display()))]
    pub async fn sign_module_file(
        &self,
        module: &Path,
        kernel_version: &str,
        identity_name: &str,
    ) -> Result<SigningResult> {
        let _lease = self.in_flight.try_acquire(kernel_version)?;
        let outcome = self.sign_single(module, kernel_version, identity_name).await;

        let mut details = serde_json::json!({
            "module": module.display().to_string(),
            "kernel": kernel_version,
            "identity": identity_name,
        });
        let success = matches!(&outcome, Ok(r) if r.is_success());
        if let Some(map) = details.as_object_mut() {
            match &outcome {
                Ok(r) if !r.failures.is_empty() => {
                    map.insert("error".into(), r.failures[0].reason.clone().into());
                }
                Err(e) => {
                    map.insert("error".into(), e.to_string().into());
                }
                Ok(_) => {}
            }
        }
        self.history.record(HistoryAction::SignModule, details, success).await;
        outcome
    }

    async fn sign_single(&self, path: &Path, kernel_version: &str, identity_name: &str) -> Result<SigningResult> {
        let compression = Compression::of_module(path)
            .filter(|_| path.is_file())
            .ok_or_else(|| TrustError::NotFound(format!("kernel module {}", path.display())))?;
        let identity = self.keys.require(identity_name)?;
        let sign_file = find_sign_file(self.runner.as_ref(), &self.paths, kernel_version)?;
        if let Some(tool) = compression.tool() {
            require_tool(self.runner.as_ref(), tool)?;
        }

        let module = KernelModule {
            path: path.to_path_buf(),
            compression,
        };
        let mut session = self.broker.open().await?;
        let response = session
            .call(sign_module_request(&sign_file, &identity, &module))
            .await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "privileged session did not close cleanly");
        }

        let mut result = SigningResult::new(kernel_version);
        match response?.into_result() {
            Ok(_) => result.record_signed(),
            Err(e) => {
                warn!(error = %e, "module signing failed");
                result.record_failure(module.path, e.to_string());
            }
        }
        Ok(result)
    }

    fn check_deadline(&self, deadline: Instant) -> Result<()> {
        if Instant::now() >= deadline {
            warn!(timeout = ?self.timeout, "signing batch timed out");
            return Err(TrustError::Timeout(self.timeout));
        }
        Ok(())
    }

    async fn run_batch(
        &self,
        request: &SignRequest,
        progress: Option<&ProgressFn<'_>>,
        cancel: &CancelToken,
        deadline: Instant,
    ) -> Result<SigningResult> {
        let identity = self.keys.require(&request.identity_name)?;

        if self.policy.sign_after_packaging && !request.source.is_installed() {
            info!("packaging would discard signatures, deferring until the kernel is installed");
            let mut result = SigningResult::new(&request.kernel_version);
            result.deferred = true;
            return Ok(result);
        }

        let plan = self.plan(request, identity)?;
        let mut session = self.broker.open().await?;
        let result = self
            .execute(&plan, session.as_mut(), progress, cancel, deadline)
            .await;
        if let Err(e) = session.close().await {
            warn!(error = %e, "privileged session did not close cleanly");
        }
        result
    }

    fn plan(&self, request: &SignRequest, identity: SigningIdentity) -> Result<Plan> {
        let version = &request.kernel_version;
        let locator = ArtifactLocator::for_source(&self.paths, &request.source);
        let artifacts = locator.artifact_set(version, false)?;

        let sign_file = find_sign_file(self.runner.as_ref(), &self.paths, version)?;
        for scheme in artifacts.compressions() {
            if let Some(tool) = scheme.tool() {
                require_tool(self.runner.as_ref(), tool)?;
            }
        }

        let boot_image = if request.sign_boot_image && boot_image_signing_supported(&self.arch) {
            let found = locator.boot_image_for(version);
            if found.is_some() {
                require_tool(self.runner.as_ref(), "sbsign")?;
            }
            found
        } else {
            None
        };

        let rebuild_initrd = request.source.is_installed() && !artifacts.modules.is_empty();
        if rebuild_initrd {
            require_tool(self.runner.as_ref(), initrd_program(self.policy.initrd_tool))?;
        }

        Ok(Plan {
            identity,
            artifacts,
            sign_file,
            wants_boot_image: request.sign_boot_image,
            boot_image,
            rebuild_initrd,
            locator,
        })
    }

    async fn execute(
        &self,
        plan: &Plan,
        session: &mut dyn ElevatedSession,
        progress: Option<&ProgressFn<'_>>,
        cancel: &CancelToken,
        deadline: Instant,
    ) -> Result<SigningResult> {
        let version = &plan.artifacts.kernel_version;
        let mut result = SigningResult::new(version);
        let total = plan.artifacts.modules.len();
        info!(modules = total, "signing modules");

        for (i, module) in plan.artifacts.modules.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(done = i, total, "signing cancelled");
                result.cancelled = true;
                break;
            }
            self.check_deadline(deadline)?;
            if let Some(report) = progress {
                report(i + 1, total, &module.display_name());
            }
            let response = session
                .call(sign_module_request(&plan.sign_file, &plan.identity, module))
                .await?;
            match response.into_result() {
                Ok(_) => result.record_signed(),
                Err(e) => {
                    warn!(module = %module.path.display(), error = %e, "module signing failed");
                    result.record_failure(module.path.clone(), e.to_string());
                }
            }
        }

        if plan.wants_boot_image && !result.cancelled {
            self.check_deadline(deadline)?;
        }
        result.boot_image = self.boot_image_step(plan, session, result.cancelled).await?;

        if plan.rebuild_initrd && !result.cancelled && result.signed > 0 {
            self.check_deadline(deadline)?;
            let tool = self.policy.initrd_tool;
            let response = session
                .call(HelperRequest::RebuildInitrd {
                    tool,
                    kernel_version: version.clone(),
                    image: plan.locator.initrd_target(version, tool),
                })
                .await?;
            result.initrd = match response.into_result() {
                Ok(_) => InitrdOutcome::Rebuilt,
                Err(e) => InitrdOutcome::Failed {
                    reason: e.to_string(),
                },
            };
        }

        info!(
            signed = result.signed,
            failed = result.failed,
            cancelled = result.cancelled,
            "signing batch finished"
        );
        Ok(result)
    }

    async fn boot_image_step(
        &self,
        plan: &Plan,
        session: &mut dyn ElevatedSession,
        cancelled: bool,
    ) -> Result<BootImageOutcome> {
        if !plan.wants_boot_image {
            return Ok(BootImageOutcome::NotRequested);
        }
        if !boot_image_signing_supported(&self.arch) {
            info!(arch = %self.arch, "skipping boot image on this architecture");
            return Ok(BootImageOutcome::unsupported_arch(&self.arch));
        }
        if cancelled {
            return Ok(BootImageOutcome::Skipped {
                reason: "batch cancelled".into(),
            });
        }
        let Some(image) = &plan.boot_image else {
            return Ok(BootImageOutcome::Skipped {
                reason: format!("no boot image found for {}", plan.artifacts.kernel_version),
            });
        };
        if !image.is_exact() {
            warn!(
                image = %image.path.display(),
                confidence = image.match_confidence,
                "signing a fuzzy boot image match"
            );
        }

        let response = session
            .call(HelperRequest::SignBootImage {
                private_key: plan.identity.private_key_path.clone(),
                cert_pem: plan.identity.cert_pem_path.clone(),
                image: image.path.clone(),
            })
            .await?;
        Ok(match response.into_result() {
            Ok(HelperResponse::Done { detail }) => BootImageOutcome::Signed {
                path: image.path.clone(),
                backup: detail.map_or_else(|| image.path.clone(), PathBuf::from),
            },
            Ok(other) => BootImageOutcome::Failed {
                reason: format!("unexpected helper response: {other:?}"),
            },
            Err(e) => BootImageOutcome::Failed {
                reason: e.to_string(),
            },
        })
    }

    async fn record(&self, request: &SignRequest, outcome: &Result<SigningResult>) {
        let mut details = serde_json::json!({
            "kernel": request.kernel_version,
            "identity": request.identity_name,
            "source": request.source,
        });
        let success = match outcome {
            Ok(result) => {
                if let Some(map) = details.as_object_mut() {
                    map.insert("result".into(), serde_json::to_value(result).unwrap_or_default());
                }
                result.is_success()
            }
            Err(e) => {
                if let Some(map) = details.as_object_mut() {
                    map.insert("error".into(), e.to_string().into());
                }
                false
            }
        };
        self.history
            .record(HistoryAction::SignKernel, details, success)
            .await;
    }
}

fn sign_module_request(sign_file: &Path, identity: &SigningIdentity, module: &KernelModule) -> HelperRequest {
    HelperRequest::SignModule {
        sign_file: sign_file.to_path_buf(),
        private_key: identity.private_key_path.clone(),
        cert_der: identity.cert_der_path.clone(),
        module: module.clone(),
    }
}
