//! Execution of privileged operations.
//!
//! Shared by the helper process and the in-process broker, so both paths
//! run exactly the same tool sequences.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use sbtrust_core::{InitrdTool, KernelModule, MokListing, Result, TrustError};

use super::protocol::{HelperRequest, HelperResponse, MokAuth};
use crate::compress::{self, remove_quietly};
use crate::enrollment::parse::parse_mok_list;
use crate::exec::{CommandOutput, CommandRunner, Invocation};

/// Suffix of the one-time boot image backup.
pub const BOOT_IMAGE_BACKUP_SUFFIX: &str = ".unsigned";

/// Suffix of the in-flight signed boot image.
pub const BOOT_IMAGE_TMP_SUFFIX: &str = ".signed.tmp";

/// Runs [`HelperRequest`]s with whatever rights the current process has.
pub struct OpExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl OpExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Execute one request; failures become [`HelperResponse::Failed`].
    pub async fn execute(&self, request: HelperRequest) -> HelperResponse {
        let op = request.name();
        match self.dispatch(request).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(op, error = %e, "privileged operation failed");
                HelperResponse::failed(e)
            }
        }
    }

    async fn dispatch(&self, request: HelperRequest) -> Result<HelperResponse> {
        match request {
            HelperRequest::Hello => Ok(HelperResponse::done()),
            HelperRequest::SignModule {
                sign_file,
                private_key,
                cert_der,
                module,
            } => {
                self.sign_module(&sign_file, &private_key, &cert_der, &module)
                    .await?;
                Ok(HelperResponse::done())
            }
            HelperRequest::SignBootImage {
                private_key,
                cert_pem,
                image,
            } => {
                let backup = self.sign_boot_image(&private_key, &cert_pem, &image).await?;
                Ok(HelperResponse::Done {
                    detail: Some(backup.display().to_string()),
                })
            }
            HelperRequest::RebuildInitrd {
                tool,
                kernel_version,
                image,
            } => {
                let inv = initrd_invocation(tool, &kernel_version, &image);
                info!(command = %inv, "regenerating initrd");
                self.runner.run_checked(&inv).await?;
                Ok(HelperResponse::done())
            }
            HelperRequest::MokListing => Ok(HelperResponse::Listing {
                listing: self.mok_listing().await?,
            }),
            HelperRequest::MokImport { cert, auth } => {
                self.mokutil_change(Invocation::new("mokutil").arg("--import").path_arg(&cert), &auth)
                    .await
            }
            HelperRequest::MokDelete { cert, auth } => {
                self.mokutil_change(Invocation::new("mokutil").arg("--delete").path_arg(&cert), &auth)
                    .await
            }
            HelperRequest::MokReset { auth } => {
                self.mokutil_change(Invocation::new("mokutil").arg("--reset"), &auth)
                    .await
            }
        }
    }

    async fn sign_module(
        &self,
        sign_file: &Path,
        private_key: &Path,
        cert_der: &Path,
        module: &KernelModule,
    ) -> Result<()> {
        let runner = Arc::clone(&self.runner);
        let base = Invocation::new(sign_file.display().to_string())
            .arg("sha256")
            .path_arg(private_key)
            .path_arg(cert_der);
        compress::with_decompressed(self.runner.as_ref(), module, |plain| async move {
            runner.run_checked(&base.path_arg(&plain)).await.map(|_| ())
        })
        .await?;
        debug!(module = %module.path.display(), "module signed");
        Ok(())
    }

    /// Sign `image` in place. Returns the backup path.
    async fn sign_boot_image(&self, private_key: &Path, cert_pem: &Path, image: &Path) -> Result<PathBuf> {
        let backup = with_suffix(image, BOOT_IMAGE_BACKUP_SUFFIX);
        if backup.exists() {
            debug!(backup = %backup.display(), "boot image backup already present");
        } else {
            tokio::fs::copy(image, &backup)
                .await
                .map_err(|e| TrustError::io(&backup, e))?;
        }

        let tmp = with_suffix(image, BOOT_IMAGE_TMP_SUFFIX);
        let inv = Invocation::new("sbsign")
            .arg("--key")
            .path_arg(private_key)
            .arg("--cert")
            .path_arg(cert_pem)
            .arg("--output")
            .path_arg(&tmp)
            .path_arg(image);
        if let Err(e) = self.runner.run_checked(&inv).await {
            remove_quietly(&tmp).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&tmp, image).await {
            remove_quietly(&tmp).await;
            return Err(TrustError::io(image, e));
        }
        info!(image = %image.display(), "boot image signed");
        Ok(backup)
    }

    async fn mok_listing(&self) -> Result<MokListing> {
        let enrolled = self
            .runner
            .run(&Invocation::new("mokutil").arg("--list-enrolled"))
            .await?;
        let raw_enrolled = listing_text(enrolled, "mokutil")?;

        let pending = self
            .runner
            .run(&Invocation::new("mokutil").arg("--list-new"))
            .await?;
        let raw_pending = listing_text(pending, "mokutil")?;
        let pending_keys = if raw_pending.contains("MokNew is empty") {
            Vec::new()
        } else {
            parse_mok_list(&raw_pending)
        };

        Ok(MokListing {
            enrolled: parse_mok_list(&raw_enrolled),
            pending: pending_keys,
            raw_enrolled,
            raw_pending,
        })
    }

    async fn mokutil_change(&self, base: Invocation, auth: &MokAuth) -> Result<HelperResponse> {
        let inv = base.args(auth.mokutil_args());
        let out = self.runner.run_checked(&inv).await?;
        Ok(HelperResponse::Done {
            detail: Some(out.stdout.trim().to_string()).filter(|s| !s.is_empty()),
        })
    }
}

/// An empty MOK list is reported with a non-zero exit by some `mokutil`
/// versions; treat "... is empty" as a valid, empty listing.
fn listing_text(out: CommandOutput, tool: &str) -> Result<String> {
    let combined = format!("{}{}", out.stdout, out.stderr);
    if out.success() {
        Ok(out.stdout)
    } else if combined.contains("is empty") {
        Ok(combined)
    } else {
        out.into_result(tool).map(|o| o.stdout)
    }
}

/// Program behind `tool`.
#[must_use]
pub const fn initrd_program(tool: InitrdTool) -> &'static str {
    match tool {
        InitrdTool::InitramfsTools => "update-initramfs",
        InitrdTool::Dracut => "dracut",
        InitrdTool::Mkinitcpio => "mkinitcpio",
    }
}

/// Command regenerating the initrd `image` for `kernel_version`.
#[must_use]
pub fn initrd_invocation(tool: InitrdTool, kernel_version: &str, image: &Path) -> Invocation {
    match tool {
        InitrdTool::InitramfsTools => Invocation::new(initrd_program(tool))
            .args(["-u", "-k", kernel_version]),
        InitrdTool::Dracut => Invocation::new(initrd_program(tool))
            .arg("--force")
            .path_arg(image)
            .arg(kernel_version),
        InitrdTool::Mkinitcpio => Invocation::new(initrd_program(tool))
            .args(["-k", kernel_version, "-g"])
            .path_arg(image),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{suffix}", path.display()))
}
