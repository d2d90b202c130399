use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Result type alias for trust-chain operations
pub type Result<T> = std::result::Result<T, TrustError>;

/// Errors that can occur while probing, enrolling, signing or verifying
#[derive(Error, Debug)]
pub enum TrustError {
    /// A required external tool is not installed
    #[error("required tool not found: {tool}")]
    ToolMissing {
        /// Name of the missing tool
        tool: String,
    },

    /// The signing identity is incomplete (key or certificate missing)
    #[error("signing identity '{name}' is incomplete: missing {}", display_paths(.missing))]
    KeyMissing {
        /// Identity name
        name: String,
        /// Files that should exist but do not
        missing: Vec<PathBuf>,
    },

    /// The privileged session was refused or dismissed
    #[error("authorization denied: {0}")]
    AuthDenied(String),

    /// Some modules of a signing batch failed
    #[error("signing finished with {failed} failure(s) out of {attempted} module(s)")]
    PartialBatchFailure {
        /// Modules attempted
        attempted: usize,
        /// Modules that failed
        failed: usize,
    },

    /// Boot-image signing is not available on this architecture
    #[error("boot-image signing is not supported on {arch}")]
    ArchitectureUnsupported {
        /// Host architecture
        arch: String,
    },

    /// No probe method could determine the Secure Boot state
    #[error("unable to determine Secure Boot state")]
    DetectionAmbiguous,

    /// Filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// An external tool ran but reported failure
    #[error("{tool} failed ({status}): {stderr}")]
    ToolFailed {
        /// Tool name
        tool: String,
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Operation exceeded its time budget
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// A signing session for this kernel is already running
    #[error("a signing session for kernel {kernel} is already in progress")]
    SigningInProgress {
        /// Kernel version being signed
        kernel: String,
    },

    /// A certificate file could not be decoded
    #[error("invalid certificate {path}: {reason}")]
    InvalidCertificate {
        /// Certificate file
        path: String,
        /// Parser message
        reason: String,
    },

    /// Artifact or resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Privileged helper protocol violation
    #[error("privileged helper protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrustError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Shorthand for [`TrustError::ToolMissing`].
    pub fn tool_missing(tool: impl Into<String>) -> Self {
        Self::ToolMissing { tool: tool.into() }
    }

    /// Returns true if the operator refused or dismissed authentication
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthDenied(_))
    }

    /// Returns true for conditions that are reported but not fatal
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        matches!(self, Self::ArchitectureUnsupported { .. })
    }

    /// Returns true if the error means something must be installed first
    #[must_use]
    pub const fn is_missing_prerequisite(&self) -> bool {
        matches!(self, Self::ToolMissing { .. } | Self::KeyMissing { .. })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_missing_lists_every_path() {
        let err = TrustError::KeyMissing {
            name: "MOK".into(),
            missing: vec![PathBuf::from("/k/MOK.priv"), PathBuf::from("/k/MOK.der")],
        };
        let msg = err.to_string();
        assert!(msg.contains("/k/MOK.priv"));
        assert!(msg.contains("/k/MOK.der"));
        assert!(err.is_missing_prerequisite());
    }

    #[test]
    fn architecture_is_informational() {
        let err = TrustError::ArchitectureUnsupported {
            arch: "aarch64".into(),
        };
        assert!(err.is_informational());
        assert!(!TrustError::Cancelled.is_informational());
    }

    #[test]
    fn sub_second_timeout_keeps_its_unit() {
        let err = TrustError::Timeout(Duration::from_millis(100));
        assert_eq!(err.to_string(), "operation timed out after 100ms");
    }

    #[test]
    fn auth_classification() {
        assert!(TrustError::AuthDenied("dismissed".into()).is_auth_error());
        assert!(!TrustError::Timeout(Duration::from_secs(5)).is_auth_error());
    }
}
