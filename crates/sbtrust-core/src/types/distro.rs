use serde::{Deserialize, Serialize};

/// Distribution identity from `/etc/os-release`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistroInfo {
    /// `ID`, lowercase (e.g. `ubuntu`)
    pub id: String,
    /// `ID_LIKE` entries, lowercase
    #[serde(default)]
    pub id_like: Vec<String>,
    /// `VERSION_ID`
    #[serde(default)]
    pub version_id: String,
    /// `NAME`
    #[serde(default)]
    pub name: String,
    /// `VERSION_CODENAME`
    #[serde(default)]
    pub codename: Option<String>,
}

impl DistroInfo {
    /// Leading numeric component of `VERSION_ID`.
    #[must_use]
    pub fn major_version(&self) -> Option<u32> {
        self.version_id
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|s| s.parse().ok())
    }

    /// `id` equals or derives from `family`.
    #[must_use]
    pub fn is_like(&self, family: &str) -> bool {
        self.id == family || self.id_like.iter().any(|l| l == family)
    }
}

/// Tool that regenerates the initrd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitrdTool {
    /// `update-initramfs` (Debian family)
    InitramfsTools,
    /// `dracut` (Fedora family)
    Dracut,
    /// `mkinitcpio` (Arch family)
    Mkinitcpio,
}

/// Package database query tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageTool {
    /// `dpkg-query`
    Dpkg,
    /// `rpm`
    Rpm,
    /// `pacman`
    Pacman,
}

/// Packaging quirks that decide the signing pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingPolicy {
    /// The packaging step compresses modules itself
    pub compresses_modules_by_default: bool,
    /// Signatures applied before packaging would be discarded
    pub sign_after_packaging: bool,
    /// Initrd regeneration tool for this family
    pub initrd_tool: InitrdTool,
    /// Package database for this family
    pub package_tool: PackageTool,
}
