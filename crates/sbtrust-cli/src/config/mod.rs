//! Configuration management.

use anyhow::{Context as _, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use sbtrust::Settings;

use crate::output::OutputFormat;

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "SBTRUST_STATE_DIR";

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default output format.
    pub output_format: Option<OutputFormat>,

    /// Always show explanations (as if --explain was passed).
    #[serde(default)]
    pub explain_by_default: bool,

    /// Library settings.
    #[serde(default)]
    pub trust: Settings,
}

impl Config {
    /// Get the config file path.
    pub fn path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("org", "sbtrust", "sbtrust")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// `explicit` if given, otherwise the default location.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        explicit.map_or_else(Self::path, |p| Ok(p.to_path_buf()))
    }

    /// Load configuration from file, then apply the environment override
    /// and expand `~` in the state directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::read(&Self::resolve_path(explicit)?)?;
        if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
            if !dir.is_empty() {
                config.trust.state_dir = PathBuf::from(dir);
            }
        }
        config.trust.state_dir = expand(&config.trust.state_dir)?;
        config.trust.validate()?;
        Ok(config)
    }

    /// Load exactly what is on disk, without overrides.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Set one key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let trust = &mut self.trust;
        match key {
            "output_format" | "output" => self.output_format = Some(value.parse()?),
            "explain_by_default" | "explain" => self.explain_by_default = value.parse()?,
            "state_dir" => trust.state_dir = PathBuf::from(value),
            "identity_name" | "identity" => trust.identity_name = value.to_string(),
            "sample_size" => trust.sample_size = value.parse()?,
            "module_threshold" => trust.module_threshold = value.parse()?,
            "initrd_threshold" => trust.initrd_threshold = value.parse()?,
            "signing_timeout_secs" => trust.signing_timeout_secs = value.parse()?,
            "privileged_timeout_secs" => trust.privileged_timeout_secs = value.parse()?,
            "history_cap" => trust.history_cap = value.parse()?,
            "launcher" => trust.launcher = value.to_string(),
            _ => anyhow::bail!(
                "Unknown config key: {}\n\n\
                 Available keys:\n  \
                 output_format           - Default output format (pretty/json/yaml)\n  \
                 explain_by_default      - Always explain commands (true/false)\n  \
                 state_dir               - Keys, history and debug log location\n  \
                 identity_name           - Signing identity used by default\n  \
                 sample_size             - Modules checked per kernel\n  \
                 module_threshold        - Signed ratio for a module sample (0.0-1.0)\n  \
                 initrd_threshold        - Signed ratio for an initrd sample (0.0-1.0)\n  \
                 signing_timeout_secs    - Upper bound for one signing batch\n  \
                 privileged_timeout_secs - Upper bound for MOK operations\n  \
                 history_cap             - History entries kept\n  \
                 launcher                - Privilege launcher (pkexec)",
                key
            ),
        }
        self.trust.validate()?;
        Ok(())
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("expanding {raw}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::read(&dir.path().join("absent.toml")).unwrap();
        assert!(config.output_format.is_none());
        assert_eq!(config.trust.sample_size, sbtrust::config::DEFAULT_SAMPLE_SIZE);
    }

    #[test]
    fn set_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.set("output", "json").unwrap();
        config.set("sample_size", "40").unwrap();
        config.set("launcher", "sudo").unwrap();
        config.save(&path).unwrap();

        let loaded = Config::read(&path).unwrap();
        assert_eq!(loaded.output_format, Some(OutputFormat::Json));
        assert_eq!(loaded.trust.sample_size, 40);
        assert_eq!(loaded.trust.launcher, "sudo");
    }

    #[test]
    fn rejects_unknown_key_and_bad_threshold() {
        let mut config = Config::default();
        assert!(config.set("api_key", "x").is_err());
        assert!(config.set("module_threshold", "1.5").is_err());
    }

    #[test]
    fn expands_variables() {
        std::env::set_var("SBTRUST_TEST_ROOT", "/tmp/sbt");
        let expanded = expand(Path::new("$SBTRUST_TEST_ROOT/state")).unwrap();
        assert_eq!(expanded, PathBuf::from("/tmp/sbt/state"));
    }
}
