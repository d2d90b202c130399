//! Custom kernel inventory.
//!
//! A kernel counts as custom when the package database does not attribute
//! its module tree to a distribution kernel package.

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use sbtrust_core::{PackageTool, Result};

use super::ArtifactLocator;
use crate::exec::{CommandRunner, Invocation};

/// Maintainer/vendor strings of distribution kernel packages.
pub const STOCK_MAINTAINERS: &[&str] = &[
    "Ubuntu Kernel Team",
    "Debian Kernel Team",
    "Canonical",
    "Fedora Project",
    "Red Hat",
    "CentOS",
    "Rocky",
    "AlmaLinux",
    "openSUSE",
    "SUSE",
];

/// Arch Linux kernel packages.
pub const STOCK_PACMAN_PACKAGES: &[&str] = &["linux", "linux-lts", "linux-zen", "linux-hardened"];

/// Tells distribution kernels from custom ones.
pub struct KernelInventory {
    runner: Arc<dyn CommandRunner>,
    package_tool: Option<PackageTool>,
}

impl KernelInventory {
    /// Inventory using `package_tool` when it is installed.
    pub fn new(runner: Arc<dyn CommandRunner>, package_tool: PackageTool) -> Self {
        let available = runner.is_available(query_program(package_tool));
        if !available {
            debug!(tool = query_program(package_tool), "package database tool missing, every kernel counts as custom");
        }
        Self {
            runner,
            package_tool: available.then_some(package_tool),
        }
    }

    /// Installed kernels that are not distribution packages.
    ///
    /// # Errors
    ///
    /// `Io` if the modules root cannot be read.
    pub async fn custom_kernels(&self, locator: &ArtifactLocator) -> Result<Vec<String>> {
        let mut custom = Vec::new();
        for version in locator.installed_kernels()? {
            if self.is_custom(&locator.modules_dir(&version)).await {
                custom.push(version);
            }
        }
        Ok(custom)
    }

    /// Whether the module tree at `modules_dir` belongs to a custom kernel.
    pub async fn is_custom(&self, modules_dir: &Path) -> bool {
        let Some(tool) = self.package_tool else {
            return true;
        };
        let stock = match tool {
            PackageTool::Dpkg => self.dpkg_is_stock(modules_dir).await,
            PackageTool::Rpm => self.rpm_is_stock(modules_dir).await,
            PackageTool::Pacman => self.pacman_is_stock(modules_dir).await,
        };
        debug!(dir = %modules_dir.display(), stock, "classified kernel");
        !stock
    }

    async fn dpkg_is_stock(&self, modules_dir: &Path) -> bool {
        let Some(owner) = self
            .query(Invocation::new("dpkg-query").arg("-S").path_arg(modules_dir))
            .await
        else {
            return false;
        };
        // "linux-modules-6.8.0-45-generic: /lib/modules/6.8.0-45-generic"
        let Some(package) = owner
            .lines()
            .next()
            .and_then(|l| l.split(':').next())
            .map(|p| p.split(',').next().unwrap_or(p).trim().to_string())
        else {
            return false;
        };
        self.query(
            Invocation::new("dpkg-query")
                .args(["-W", "-f=${Maintainer}"])
                .arg(package),
        )
        .await
        .is_some_and(|m| is_stock_maintainer(&m))
    }

    async fn rpm_is_stock(&self, modules_dir: &Path) -> bool {
        self.query(
            Invocation::new("rpm")
                .args(["-qf", "--queryformat", "%{VENDOR}"])
                .path_arg(modules_dir),
        )
        .await
        .is_some_and(|vendor| is_stock_maintainer(&vendor))
    }

    async fn pacman_is_stock(&self, modules_dir: &Path) -> bool {
        self.query(Invocation::new("pacman").arg("-Qqo").path_arg(modules_dir))
            .await
            .is_some_and(|out| {
                out.lines()
                    .any(|pkg| STOCK_PACMAN_PACKAGES.contains(&pkg.trim()))
            })
    }

    async fn query(&self, inv: Invocation) -> Option<String> {
        match self.runner.run(&inv).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => Some(out.stdout),
            Ok(out) => {
                debug!(command = %inv, status = %out.status_text(), "package query found no owner");
                None
            }
            Err(e) => {
                debug!(command = %inv, error = %e, "package query failed");
                None
            }
        }
    }
}

/// Program used to query `tool`'s database.
#[must_use]
pub const fn query_program(tool: PackageTool) -> &'static str {
    match tool {
        PackageTool::Dpkg => "dpkg-query",
        PackageTool::Rpm => "rpm",
        PackageTool::Pacman => "pacman",
    }
}

fn is_stock_maintainer(text: &str) -> bool {
    STOCK_MAINTAINERS.iter().any(|m| text.contains(m))
}
