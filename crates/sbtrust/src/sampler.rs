//! Signature sampling.
//!
//! Checking every module of a kernel is slow, so a random subset is
//! inspected and the signed ratio compared against a threshold. The verdict
//! is an estimate: a kernel with a handful of unsigned modules can pass.

use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use sbtrust_core::{
    BootImageCheck, Compression, KernelModule, ModuleSignature, Result, SampleReport, SigningIdentity,
    TrustError,
};

use crate::artifacts::{scan_modules, ArtifactLocator};
use crate::compress;
use crate::exec::tools::require_tool;
use crate::exec::{CommandRunner, Invocation};
use crate::signing::boot_image_signing_supported;

/// Samples kernels, initrds and boot images for signatures.
pub struct VerificationSampler {
    runner: Arc<dyn CommandRunner>,
    locator: ArtifactLocator,
    module_threshold: f64,
    initrd_threshold: f64,
    arch: String,
}

impl VerificationSampler {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        locator: ArtifactLocator,
        module_threshold: f64,
        initrd_threshold: f64,
    ) -> Self {
        Self {
            runner,
            locator,
            module_threshold,
            initrd_threshold,
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Override the host architecture.
    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Sample up to `sample_size` modules of an installed kernel.
    ///
    /// # Errors
    ///
    /// `NotFound` without a module directory, `ToolMissing` without `modinfo`.
    #[instrument(skip(self))]
    pub async fn sample_kernel(&self, kernel_version: &str, sample_size: usize) -> Result<SampleReport> {
        let modules = self.locator.modules_for(kernel_version)?;
        self.sample_modules(&modules, sample_size, self.module_threshold)
            .await
    }

    /// Sample the modules embedded in a kernel's initrd.
    ///
    /// `None` when the kernel has no initrd or the initrd holds no modules.
    ///
    /// # Errors
    ///
    /// `ToolMissing` without an unpacker or `modinfo`, `ToolFailed` if
    /// unpacking fails.
    #[instrument(skip(self))]
    pub async fn sample_initrd(&self, kernel_version: &str, sample_size: usize) -> Result<Option<SampleReport>> {
        let Some(image) = self.locator.initrd_for(kernel_version) else {
            debug!("no initrd");
            return Ok(None);
        };
        require_tool(self.runner.as_ref(), "modinfo")?;

        let scratch = scratch_dir("sbtrust-initrd")?;
        self.unpack_initrd(&image, scratch.path()).await?;
        let modules = scan_modules(scratch.path());
        if modules.is_empty() {
            debug!(image = %image.display(), "initrd contains no modules");
            return Ok(None);
        }
        self.sample_modules(&modules, sample_size, self.initrd_threshold)
            .await
            .map(Some)
    }

    /// Verify the boot image against `identity`'s certificate.
    #[instrument(skip(self, identity))]
    pub async fn check_boot_image(&self, kernel_version: &str, identity: Option<&SigningIdentity>) -> BootImageCheck {
        if !boot_image_signing_supported(&self.arch) {
            return BootImageCheck::Unsupported;
        }
        let Some(identity) = identity.filter(|id| id.cert_pem_path.is_file()) else {
            return unavailable("no signing certificate to verify against");
        };
        if !self.runner.is_available("sbverify") {
            return unavailable("sbverify is not installed");
        }
        let Some(image) = self.locator.boot_image_for(kernel_version) else {
            return unavailable(format!("no boot image found for {kernel_version}"));
        };

        let inv = Invocation::new("sbverify")
            .arg("--cert")
            .path_arg(&identity.cert_pem_path)
            .path_arg(&image.path);
        match self.runner.run(&inv).await {
            Ok(out) if out.success() => BootImageCheck::Signed,
            Ok(out) => {
                debug!(image = %image.path.display(), status = %out.status_text(), "boot image does not verify");
                BootImageCheck::Unsigned
            }
            Err(e) => unavailable(e.to_string()),
        }
    }

    /// Inspect a single module file, compressed or not, without sampling.
    ///
    /// # Errors
    ///
    /// `NotFound` if `path` is not a kernel module file, `ToolMissing`
    /// without `modinfo` or the decompressor, `ToolFailed` if `modinfo`
    /// cannot read the module.
    #[instrument(skip(self, path), fields(module = %path.display()))]
    pub async fn check_module(&self, path: &Path) -> Result<ModuleSignature> {
        let compression = Compression::of_module(path)
            .filter(|_| path.is_file())
            .ok_or_else(|| TrustError::NotFound(format!("kernel module {}", path.display())))?;
        require_tool(self.runner.as_ref(), "modinfo")?;

        let module = KernelModule {
            path: path.to_path_buf(),
            compression,
        };
        let scratch = scratch_dir("sbtrust-module")?;
        let plain = self.expanded_copy(&module, scratch.path(), 0).await?;

        let sig_id = self
            .runner
            .run_checked(&Invocation::new("modinfo").args(["-F", "sig_id"]).path_arg(&plain))
            .await?;
        let sig_id = Some(sig_id.stdout.trim().to_string()).filter(|s| !s.is_empty());
        let info = self
            .runner
            .run_checked(&Invocation::new("modinfo").path_arg(&plain))
            .await?;
        Ok(ModuleSignature::from_modinfo(module.path, sig_id, &info.stdout))
    }

    /// Sample `modules` and apply `threshold`.
    ///
    /// # Errors
    ///
    /// `ToolMissing` without `modinfo`, `Io` if no scratch space is available.
    pub async fn sample_modules(
        &self,
        modules: &[KernelModule],
        sample_size: usize,
        threshold: f64,
    ) -> Result<SampleReport> {
        require_tool(self.runner.as_ref(), "modinfo")?;
        let picked: Vec<KernelModule> = {
            let mut rng = rand::thread_rng();
            modules
                .choose_multiple(&mut rng, sample_size)
                .cloned()
                .collect()
        };

        let scratch = scratch_dir("sbtrust-sample")?;
        let mut signed = 0;
        for (i, module) in picked.iter().enumerate() {
            match self.module_is_signed(module, scratch.path(), i).await {
                Ok(true) => signed += 1,
                Ok(false) => {}
                Err(e) => warn!(module = %module.path.display(), error = %e, "cannot inspect module, counting as unsigned"),
            }
        }

        let report = SampleReport::evaluate(signed, picked.len(), threshold);
        debug!(
            signed = report.signed,
            checked = report.checked,
            total = modules.len(),
            is_signed = report.is_signed,
            "sampled modules"
        );
        Ok(report)
    }

    /// Copy the module to scratch space and expand it there, so the original
    /// is never touched.
    async fn expanded_copy(&self, module: &KernelModule, scratch: &Path, index: usize) -> Result<std::path::PathBuf> {
        let copy = scratch.join(format!("{index}-{}", module.display_name()));
        tokio::fs::copy(&module.path, &copy)
            .await
            .map_err(|e| TrustError::io(&module.path, e))?;
        let scratch_module = KernelModule {
            path: copy,
            compression: module.compression,
        };
        compress::decompress(self.runner.as_ref(), &scratch_module).await
    }

    async fn module_is_signed(&self, module: &KernelModule, scratch: &Path, index: usize) -> Result<bool> {
        let plain = self.expanded_copy(module, scratch, index).await?;
        let out = self
            .runner
            .run(&Invocation::new("modinfo").args(["-F", "sig_id"]).path_arg(&plain))
            .await?;
        Ok(out.success() && !out.stdout.trim().is_empty())
    }

    async fn unpack_initrd(&self, image: &Path, dest: &Path) -> Result<()> {
        let inv = if self.runner.is_available("unmkinitramfs") {
            Invocation::new("unmkinitramfs").path_arg(image).path_arg(dest)
        } else if self.runner.is_available("lsinitrd") {
            Invocation::new("lsinitrd")
                .arg("--unpack")
                .path_arg(image)
                .current_dir(dest)
        } else {
            return Err(TrustError::tool_missing("unmkinitramfs"));
        };
        debug!(command = %inv, "unpacking initrd");
        self.runner.run_checked(&inv).await.map(|_| ())
    }
}

fn scratch_dir(prefix: &str) -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|e| TrustError::io(std::env::temp_dir(), e))
}

fn unavailable(reason: impl Into<String>) -> BootImageCheck {
    BootImageCheck::Unavailable {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostPaths, INITRD_SIGNED_THRESHOLD, MODULE_SIGNED_THRESHOLD};
    use crate::exec::testing::{write_module, FakeRunner, SBSIGN_MARKER};
    use chrono::Utc;
    use std::path::PathBuf;

    const KERNEL: &str = "6.9.1-custom";

    struct Host {
        _root: tempfile::TempDir,
        paths: HostPaths,
    }

    fn host() -> Host {
        let root = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted_at(root.path());
        Host { _root: root, paths }
    }

    fn sampler(host: &Host, runner: FakeRunner) -> (VerificationSampler, Arc<FakeRunner>) {
        let runner = Arc::new(runner);
        let sampler = VerificationSampler::new(
            runner.clone(),
            ArtifactLocator::new(&host.paths),
            MODULE_SIGNED_THRESHOLD,
            INITRD_SIGNED_THRESHOLD,
        )
        .with_arch("x86_64");
        (sampler, runner)
    }

    /// `count` modules of which the first `signed` carry a signature.
    fn kernel_with(host: &Host, count: usize, signed: usize) -> Vec<PathBuf> {
        let exts = ["ko", "ko.xz", "ko.zst", "ko.gz"];
        (0..count)
            .map(|i| {
                let path = host
                    .paths
                    .modules_root
                    .join(KERNEL)
                    .join(format!("kernel/m{i:02}.{}", exts[i % exts.len()]));
                write_module(&path, i < signed);
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn sample_verdict_follows_threshold() {
        let h = host();
        kernel_with(&h, 20, 19);
        let (s, _) = sampler(&h, FakeRunner::new().with_all_tools());
        let report = s.sample_kernel(KERNEL, 20).await.unwrap();
        assert_eq!((report.signed, report.checked), (19, 20));
        assert!(report.is_signed);

        let h = host();
        kernel_with(&h, 20, 18);
        let (s, _) = sampler(&h, FakeRunner::new().with_all_tools());
        let report = s.sample_kernel(KERNEL, 20).await.unwrap();
        assert_eq!(report.signed, 18);
        assert!(!report.is_signed);
    }

    #[tokio::test]
    async fn samples_at_most_sample_size() {
        let h = host();
        kernel_with(&h, 40, 40);
        let (s, runner) = sampler(&h, FakeRunner::new().with_all_tools());
        let report = s.sample_kernel(KERNEL, 20).await.unwrap();
        assert_eq!(report.checked, 20);
        assert!(report.is_signed);
        assert_eq!(runner.calls_to("modinfo").len(), 20);

        let report = s.sample_kernel(KERNEL, 100).await.unwrap();
        assert_eq!(report.checked, 40);
    }

    #[tokio::test]
    async fn originals_are_left_untouched() {
        let h = host();
        let modules = kernel_with(&h, 8, 0);
        let before: Vec<Vec<u8>> = modules.iter().map(|m| std::fs::read(m).unwrap()).collect();
        let (s, _) = sampler(&h, FakeRunner::new().with_all_tools());

        let report = s.sample_kernel(KERNEL, 20).await.unwrap();
        assert_eq!((report.signed, report.checked), (0, 8));

        for (m, bytes) in modules.iter().zip(before) {
            assert_eq!(std::fs::read(m).unwrap(), bytes);
        }
        let leftovers = scan_modules(&h.paths.modules_root.join(KERNEL));
        assert_eq!(leftovers.len(), 8);
    }

    #[tokio::test]
    async fn missing_kernel_and_missing_modinfo() {
        let h = host();
        let (s, _) = sampler(&h, FakeRunner::new().with_all_tools());
        assert!(matches!(s.sample_kernel(KERNEL, 20).await, Err(TrustError::NotFound(_))));

        kernel_with(&h, 2, 2);
        let (s, _) = sampler(&h, FakeRunner::new().with_tools(&["xz", "zstd", "gzip"]));
        assert!(matches!(
            s.sample_kernel(KERNEL, 20).await,
            Err(TrustError::ToolMissing { ref tool }) if tool == "modinfo"
        ));
    }

    #[tokio::test]
    async fn single_module_reports_signer_details() {
        let h = host();
        let modules = kernel_with(&h, 2, 1);
        let before = std::fs::read(&modules[0]).unwrap();
        let (s, runner) = sampler(&h, FakeRunner::new().with_all_tools());

        let signed = s.check_module(&modules[0]).await.unwrap();
        assert!(signed.signed);
        assert_eq!(signed.sig_id.as_deref(), Some("PKCS#7"));
        assert_eq!(signed.signer.as_deref(), Some("sbtrust MOK"));
        assert_eq!(signed.sig_hashalgo.as_deref(), Some("sha256"));
        assert_eq!(signed.path, modules[0]);
        assert_eq!(std::fs::read(&modules[0]).unwrap(), before);

        // m01 is xz-compressed and unsigned
        let unsigned = s.check_module(&modules[1]).await.unwrap();
        assert!(!unsigned.signed);
        assert_eq!(unsigned.signer, None);
        assert!(!modules[1].with_extension("").exists());
        assert_eq!(runner.calls_to("modinfo").len(), 4);
    }

    #[tokio::test]
    async fn single_module_must_be_a_module_file() {
        let h = host();
        let (s, _) = sampler(&h, FakeRunner::new().with_all_tools());
        let missing = h.paths.modules_root.join("nothing.ko");
        assert!(matches!(s.check_module(&missing).await, Err(TrustError::NotFound(_))));

        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "x").unwrap();
        assert!(matches!(s.check_module(&notes).await, Err(TrustError::NotFound(_))));
    }

    fn write_initrd(host: &Host, listing: &str) {
        std::fs::create_dir_all(&host.paths.boot_dir).unwrap();
        std::fs::write(host.paths.boot_dir.join(format!("initrd.img-{KERNEL}")), listing).unwrap();
    }

    #[tokio::test]
    async fn initrd_uses_lower_threshold() {
        let h = host();
        write_initrd(&h, "usr/lib/modules/x/a.ko 1\nusr/lib/modules/x/b.ko.xz 0\n");
        let (s, runner) = sampler(&h, FakeRunner::new().with_all_tools());

        let report = s.sample_initrd(KERNEL, 20).await.unwrap().unwrap();
        assert_eq!((report.signed, report.checked), (1, 2));
        assert!(report.is_signed);
        assert_eq!(runner.calls_to("unmkinitramfs").len(), 1);
    }

    #[tokio::test]
    async fn initrd_falls_back_to_lsinitrd() {
        let h = host();
        write_initrd(&h, "lib/modules/x/a.ko 0\nlib/modules/x/b.ko 0\nlib/modules/x/c.ko 1\n");
        let (s, runner) = sampler(&h, FakeRunner::new().with_tools(&["modinfo", "lsinitrd", "xz"]));

        let report = s.sample_initrd(KERNEL, 20).await.unwrap().unwrap();
        assert_eq!(report.checked, 3);
        assert!(!report.is_signed);
        assert!(runner.calls_to("lsinitrd")[0].cwd.is_some());
    }

    #[tokio::test]
    async fn no_initrd_or_no_modules_is_none() {
        let h = host();
        let (s, _) = sampler(&h, FakeRunner::new().with_all_tools());
        assert!(s.sample_initrd(KERNEL, 20).await.unwrap().is_none());

        write_initrd(&h, "");
        assert!(s.sample_initrd(KERNEL, 20).await.unwrap().is_none());
    }

    fn identity(dir: &Path) -> SigningIdentity {
        let pem = dir.join("MOK.pem");
        std::fs::write(&pem, "-----BEGIN CERTIFICATE-----\n").unwrap();
        SigningIdentity {
            name: "MOK".into(),
            common_name: "Lab Key".into(),
            private_key_path: dir.join("MOK.priv"),
            cert_der_path: dir.join("MOK.der"),
            cert_pem_path: pem,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn boot_image_verification() {
        let h = host();
        let keys = tempfile::tempdir().unwrap();
        let id = identity(keys.path());
        std::fs::create_dir_all(&h.paths.boot_dir).unwrap();
        let image = h.paths.boot_dir.join(format!("vmlinuz-{KERNEL}"));
        std::fs::write(&image, b"MZ kernel").unwrap();

        let (s, _) = sampler(&h, FakeRunner::new().with_all_tools());
        assert_eq!(s.check_boot_image(KERNEL, Some(&id)).await, BootImageCheck::Unsigned);

        let mut signed = b"MZ kernel".to_vec();
        signed.extend_from_slice(SBSIGN_MARKER);
        std::fs::write(&image, signed).unwrap();
        assert_eq!(s.check_boot_image(KERNEL, Some(&id)).await, BootImageCheck::Signed);

        assert!(matches!(
            s.check_boot_image(KERNEL, None).await,
            BootImageCheck::Unavailable { .. }
        ));
        let s = s.with_arch("riscv64");
        assert_eq!(s.check_boot_image(KERNEL, Some(&id)).await, BootImageCheck::Unsupported);

        let (s, _) = sampler(&h, FakeRunner::new().with_tools(&["modinfo"]));
        assert!(matches!(
            s.check_boot_image(KERNEL, Some(&id)).await,
            BootImageCheck::Unavailable { .. }
        ));
    }
}
