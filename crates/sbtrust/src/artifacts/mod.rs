//! Kernel artifact discovery: modules, boot image, initrd.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use sbtrust_core::{
    ArtifactSource, Compression, InitrdTool, KernelArtifactSet, KernelModule, Result, TrustError,
};

use crate::config::HostPaths;

pub mod boot_image;
pub mod inventory;

pub use boot_image::{find_boot_image, score_candidate};
pub use inventory::KernelInventory;

/// Leading numeric `X.Y[.Z]` of a kernel release (`6.9.1-custom` → `6.9.1`).
#[must_use]
pub fn base_version(kernel_version: &str) -> Option<&str> {
    let mut end = 0;
    let mut dots = 0;
    for (i, c) in kernel_version.char_indices() {
        if c.is_ascii_digit() {
            end = i + 1;
        } else if c == '.' && end == i && dots < 2 {
            dots += 1;
        } else {
            break;
        }
    }
    (dots >= 1 && kernel_version[..end].contains('.')).then(|| &kernel_version[..end])
}

/// Finds a kernel's artifacts in the live system or in a staging tree.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    modules_root: PathBuf,
    boot_dir: PathBuf,
}

impl ArtifactLocator {
    /// Locator over the installed system.
    #[must_use]
    pub fn new(paths: &HostPaths) -> Self {
        Self {
            modules_root: paths.modules_root.clone(),
            boot_dir: paths.boot_dir.clone(),
        }
    }

    /// Locator for `source`: the installed system or a package staging root.
    #[must_use]
    pub fn for_source(paths: &HostPaths, source: &ArtifactSource) -> Self {
        match source {
            ArtifactSource::Installed => Self::new(paths),
            ArtifactSource::Staged(root) => Self::staged(root),
        }
    }

    /// Locator over a package staging root (`<root>/lib/modules`, `<root>/boot`).
    #[must_use]
    pub fn staged(root: &Path) -> Self {
        let lib = root.join("lib/modules");
        let usr_lib = root.join("usr/lib/modules");
        let modules_root = if !lib.is_dir() && usr_lib.is_dir() {
            usr_lib
        } else {
            lib
        };
        Self {
            modules_root,
            boot_dir: root.join("boot"),
        }
    }

    /// Root holding per-kernel module trees.
    #[must_use]
    pub fn modules_root(&self) -> &Path {
        &self.modules_root
    }

    /// Directory holding boot images and initrds.
    #[must_use]
    pub fn boot_dir(&self) -> &Path {
        &self.boot_dir
    }

    /// Module tree of one kernel.
    #[must_use]
    pub fn modules_dir(&self, kernel_version: &str) -> PathBuf {
        self.modules_root.join(kernel_version)
    }

    /// Every `.ko`, `.ko.xz`, `.ko.gz` and `.ko.zst` of a kernel, sorted by path.
    ///
    /// # Errors
    ///
    /// `NotFound` if the kernel has no module directory.
    pub fn modules_for(&self, kernel_version: &str) -> Result<Vec<KernelModule>> {
        let dir = self.modules_dir(kernel_version);
        if !dir.is_dir() {
            return Err(TrustError::NotFound(format!(
                "module directory {}",
                dir.display()
            )));
        }
        Ok(scan_modules(&dir))
    }

    /// Best boot image for a kernel; see [`find_boot_image`].
    #[must_use]
    pub fn boot_image_for(&self, kernel_version: &str) -> Option<sbtrust_core::BootImageMatch> {
        find_boot_image(&self.boot_dir, kernel_version)
    }

    /// Modules plus (optionally) the boot image of a kernel.
    ///
    /// # Errors
    ///
    /// `NotFound` if the kernel has no module directory.
    pub fn artifact_set(&self, kernel_version: &str, with_boot_image: bool) -> Result<KernelArtifactSet> {
        Ok(KernelArtifactSet {
            kernel_version: kernel_version.to_string(),
            modules: self.modules_for(kernel_version)?,
            boot_image: with_boot_image
                .then(|| self.boot_image_for(kernel_version))
                .flatten(),
        })
    }

    /// Kernel release whose module tree holds `module`.
    #[must_use]
    pub fn kernel_for_module(&self, module: &Path) -> Option<String> {
        module
            .strip_prefix(&self.modules_root)
            .ok()?
            .components()
            .next()
            .and_then(|c| c.as_os_str().to_str())
            .filter(|name| name.starts_with(|c: char| c.is_ascii_digit()))
            .map(str::to_string)
    }

    /// Kernel versions with a module tree, sorted.
    ///
    /// # Errors
    ///
    /// `Io` if the modules root exists but cannot be read.
    pub fn installed_kernels(&self) -> Result<Vec<String>> {
        if !self.modules_root.is_dir() {
            return Ok(Vec::new());
        }
        let entries =
            std::fs::read_dir(&self.modules_root).map_err(|e| TrustError::io(&self.modules_root, e))?;
        let mut versions: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(|c: char| c.is_ascii_digit()))
            .collect();
        versions.sort();
        Ok(versions)
    }

    /// Existing initrd of a kernel (`initrd.img-<v>` or `initramfs-<v>.img`).
    #[must_use]
    pub fn initrd_for(&self, kernel_version: &str) -> Option<PathBuf> {
        [
            format!("initrd.img-{kernel_version}"),
            format!("initramfs-{kernel_version}.img"),
        ]
        .into_iter()
        .map(|name| self.boot_dir.join(name))
        .find(|p| p.is_file())
    }

    /// Where `tool` writes a kernel's initrd.
    #[must_use]
    pub fn initrd_target(&self, kernel_version: &str, tool: InitrdTool) -> PathBuf {
        self.initrd_for(kernel_version).unwrap_or_else(|| {
            let name = match tool {
                InitrdTool::InitramfsTools => format!("initrd.img-{kernel_version}"),
                InitrdTool::Dracut | InitrdTool::Mkinitcpio => format!("initramfs-{kernel_version}.img"),
            };
            self.boot_dir.join(name)
        })
    }
}

/// Collect kernel modules below `dir`.
#[must_use]
pub fn scan_modules(dir: &Path) -> Vec<KernelModule> {
    let modules: Vec<KernelModule> = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let path = e.into_path();
            Compression::of_module(&path).map(|compression| KernelModule { path, compression })
        })
        .collect();
    debug!(dir = %dir.display(), count = modules.len(), "scanned modules");
    modules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::write_module;

    #[test]
    fn base_version_extraction() {
        assert_eq!(base_version("6.9.1-custom"), Some("6.9.1"));
        assert_eq!(base_version("6.9-rc3"), Some("6.9"));
        assert_eq!(base_version("6.8.0-45-generic"), Some("6.8.0"));
        assert_eq!(base_version("6.9.1.2-x"), Some("6.9.1"));
        assert_eq!(base_version("custom"), None);
        assert_eq!(base_version("6-x"), None);
    }

    #[test]
    fn modules_tagged_by_compression() {
        let root = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted_at(root.path());
        let dir = paths.modules_root.join("6.9.1/kernel/drivers");
        for name in ["a.ko", "b.ko.xz", "c.ko.gz", "d.ko.zst"] {
            write_module(&dir.join(name), false);
        }
        std::fs::write(paths.modules_root.join("6.9.1/modules.dep"), b"").unwrap();

        let locator = ArtifactLocator::new(&paths);
        let modules = locator.modules_for("6.9.1").unwrap();
        let schemes: Vec<_> = modules.iter().map(|m| m.compression).collect();
        assert_eq!(
            schemes,
            vec![Compression::None, Compression::Xz, Compression::Gz, Compression::Zst]
        );
    }

    #[test]
    fn missing_directory_vs_empty_directory() {
        let root = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted_at(root.path());
        let locator = ArtifactLocator::new(&paths);
        assert!(matches!(locator.modules_for("6.9.1"), Err(TrustError::NotFound(_))));

        std::fs::create_dir_all(paths.modules_root.join("6.9.1")).unwrap();
        assert!(locator.modules_for("6.9.1").unwrap().is_empty());
        assert_eq!(locator.installed_kernels().unwrap(), vec!["6.9.1"]);
    }

    #[test]
    fn kernel_of_a_module_path() {
        let root = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted_at(root.path());
        let locator = ArtifactLocator::new(&paths);
        let module = paths.modules_root.join("6.9.1-custom/kernel/fs/a.ko.xz");
        assert_eq!(locator.kernel_for_module(&module).as_deref(), Some("6.9.1-custom"));
        assert_eq!(locator.kernel_for_module(&root.path().join("tmp/a.ko")), None);
    }

    #[test]
    fn staged_root_layout() {
        let root = tempfile::tempdir().unwrap();
        write_module(&root.path().join("usr/lib/modules/6.9.1/x.ko"), false);
        let locator = ArtifactLocator::for_source(
            &HostPaths::default(),
            &ArtifactSource::Staged(root.path().to_path_buf()),
        );
        assert_eq!(locator.modules_for("6.9.1").unwrap().len(), 1);
        assert_eq!(locator.boot_dir(), root.path().join("boot"));
    }

    #[test]
    fn initrd_naming() {
        let root = tempfile::tempdir().unwrap();
        let paths = HostPaths::rooted_at(root.path());
        let locator = ArtifactLocator::new(&paths);
        assert!(locator.initrd_for("6.9.1").is_none());
        assert_eq!(
            locator.initrd_target("6.9.1", InitrdTool::Dracut),
            paths.boot_dir.join("initramfs-6.9.1.img")
        );

        std::fs::create_dir_all(&paths.boot_dir).unwrap();
        std::fs::write(paths.boot_dir.join("initrd.img-6.9.1"), b"").unwrap();
        assert_eq!(
            locator.initrd_for("6.9.1"),
            Some(paths.boot_dir.join("initrd.img-6.9.1"))
        );
    }
}
