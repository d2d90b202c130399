use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Compression scheme of a kernel module file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain `.ko`
    None,
    /// `.ko.xz`
    Xz,
    /// `.ko.gz`
    Gz,
    /// `.ko.zst`
    Zst,
}

impl Compression {
    /// All recognized schemes.
    pub const ALL: [Self; 4] = [Self::None, Self::Xz, Self::Gz, Self::Zst];

    /// Full module suffix for this scheme.
    #[must_use]
    pub const fn module_suffix(self) -> &'static str {
        match self {
            Self::None => ".ko",
            Self::Xz => ".ko.xz",
            Self::Gz => ".ko.gz",
            Self::Zst => ".ko.zst",
        }
    }

    /// Compressed extension (without the dot), if any.
    #[must_use]
    pub const fn extension(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Xz => Some("xz"),
            Self::Gz => Some("gz"),
            Self::Zst => Some("zst"),
        }
    }

    /// Tool that (de)compresses this scheme.
    #[must_use]
    pub const fn tool(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Xz => Some("xz"),
            Self::Gz => Some("gzip"),
            Self::Zst => Some("zstd"),
        }
    }

    /// Classify a path by its module suffix; `None` if it is not a module.
    #[must_use]
    pub fn of_module(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        // longest suffix first so `.ko.xz` is not mistaken for something else
        [Self::Xz, Self::Gz, Self::Zst, Self::None]
            .into_iter()
            .find(|c| name.ends_with(c.module_suffix()) && name.len() > c.module_suffix().len())
    }

    /// Whether the file needs decompressing before `sign-file` can touch it.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Xz => write!(f, "xz"),
            Self::Gz => write!(f, "gz"),
            Self::Zst => write!(f, "zst"),
        }
    }
}

/// A kernel module file and how it is compressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelModule {
    /// Path on disk
    pub path: PathBuf,
    /// Compression scheme
    pub compression: Compression,
}

impl KernelModule {
    /// Sibling path of the decompressed `.ko`.
    #[must_use]
    pub fn decompressed_path(&self) -> PathBuf {
        match self.compression.extension() {
            Some(_) => self.path.with_extension(""),
            None => self.path.clone(),
        }
    }

    /// File name for progress reporting.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// Best boot-image candidate for a kernel version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootImageMatch {
    /// Image path
    pub path: PathBuf,
    /// Segment-overlap score; exact filename matches get [`BootImageMatch::EXACT`]
    pub match_confidence: u32,
}

impl BootImageMatch {
    /// Confidence reported for an exact `vmlinuz-<version>` hit.
    pub const EXACT: u32 = 100;

    /// True if the filename matched exactly.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        self.match_confidence == Self::EXACT
    }
}

/// Everything the signer and sampler need to know about one kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelArtifactSet {
    /// Kernel release string (module directory name)
    pub kernel_version: String,
    /// Module files
    pub modules: Vec<KernelModule>,
    /// Matched boot image
    pub boot_image: Option<BootImageMatch>,
}

impl KernelArtifactSet {
    /// Distinct compression schemes present, in first-seen order.
    #[must_use]
    pub fn compressions(&self) -> Vec<Compression> {
        let mut seen: Vec<Compression> = Vec::new();
        for m in &self.modules {
            if !seen.contains(&m.compression) {
                seen.push(m.compression);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_module_suffixes() {
        assert_eq!(Compression::of_module(Path::new("/m/e1000e.ko")), Some(Compression::None));
        assert_eq!(Compression::of_module(Path::new("/m/e1000e.ko.xz")), Some(Compression::Xz));
        assert_eq!(Compression::of_module(Path::new("/m/e1000e.ko.gz")), Some(Compression::Gz));
        assert_eq!(Compression::of_module(Path::new("/m/e1000e.ko.zst")), Some(Compression::Zst));
        assert_eq!(Compression::of_module(Path::new("/m/modules.dep")), None);
        assert_eq!(Compression::of_module(Path::new("/m/.ko")), None);
    }

    #[test]
    fn decompressed_path_is_sibling_ko() {
        let m = KernelModule {
            path: PathBuf::from("/lib/modules/6.9.1/kernel/nvme.ko.zst"),
            compression: Compression::Zst,
        };
        assert_eq!(m.decompressed_path(), PathBuf::from("/lib/modules/6.9.1/kernel/nvme.ko"));
        assert_eq!(m.display_name(), "nvme.ko.zst");
    }
}
