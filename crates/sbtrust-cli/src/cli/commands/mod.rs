//! Command implementations.

pub mod config;
pub mod deps;
pub mod diagnose;
pub mod helper;
pub mod history;
pub mod kernels;
pub mod keys;
pub mod mok;
pub mod sign;
pub mod status;
pub mod verify;

use std::path::{Path, PathBuf};

use sbtrust::{Settings, Subsystem};

use crate::output::OutputFormat;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output format
    pub output_format: OutputFormat,

    /// Whether to show educational explanations
    pub explain: bool,

    /// Verbose output
    pub verbose: bool,

    /// Disable colors
    pub no_color: bool,

    /// Where the configuration was loaded from
    pub config_path: PathBuf,

    /// Library settings, overrides applied
    pub settings: Settings,
}

impl Context {
    /// Wire the trust chain components for this host.
    pub async fn subsystem(&self) -> anyhow::Result<Subsystem> {
        Ok(Subsystem::for_host(self.settings.clone()).await?)
    }

    /// `name`, or the configured default identity.
    pub fn identity_name<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.settings.identity_name)
    }

    /// Explanations are plain text; skip them when stdout is machine-readable.
    pub fn explain_enabled(&self) -> bool {
        self.explain && self.output_format == OutputFormat::Pretty
    }
}

/// Anchor a relative path at the working directory without resolving links;
/// `/lib` is often a symlink and the module tree is matched lexically.
pub(crate) fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_are_anchored_not_resolved() {
        let abs = absolute(Path::new("/lib/modules/6.9.1/a.ko")).unwrap();
        assert_eq!(abs, PathBuf::from("/lib/modules/6.9.1/a.ko"));

        let rel = absolute(Path::new("a.ko.xz")).unwrap();
        assert!(rel.is_absolute());
        assert!(rel.ends_with("a.ko.xz"));
    }
}
