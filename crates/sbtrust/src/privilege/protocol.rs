//! JSON-lines protocol spoken with the privileged helper.
//!
//! One request per line on the helper's stdin, one response per line on its
//! stdout. The helper announces itself with [`HelperResponse::Ready`] before
//! reading anything, which is how the parent knows authentication succeeded.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use sbtrust_core::{InitrdTool, KernelModule, MokListing, Result, TrustError};

/// Protocol revision; bumped on incompatible changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// How `mokutil` authenticates a pending MOK change at the next boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MokAuth {
    /// Password hash produced by `mokutil --generate-hash`
    HashFile { path: PathBuf },
    /// Reuse the root password
    RootPassword,
}

impl MokAuth {
    /// `mokutil` arguments selecting this authentication.
    #[must_use]
    pub fn mokutil_args(&self) -> Vec<String> {
        match self {
            Self::HashFile { path } => vec!["--hash-file".into(), path.display().to_string()],
            Self::RootPassword => vec!["--root-pw".into()],
        }
    }
}

/// Operations the helper performs with elevated rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "op")]
pub enum HelperRequest {
    /// Liveness check
    Hello,
    /// Sign one module in place, keeping its compression
    SignModule {
        sign_file: PathBuf,
        private_key: PathBuf,
        cert_der: PathBuf,
        module: KernelModule,
    },
    /// Sign a boot image in place, backing it up first
    SignBootImage {
        private_key: PathBuf,
        cert_pem: PathBuf,
        image: PathBuf,
    },
    /// Regenerate the initrd for a kernel
    RebuildInitrd {
        tool: InitrdTool,
        kernel_version: String,
        image: PathBuf,
    },
    /// Enrolled and pending MOK listings in one go
    MokListing,
    /// Queue a certificate for enrollment
    MokImport { cert: PathBuf, auth: MokAuth },
    /// Queue a certificate for removal
    MokDelete { cert: PathBuf, auth: MokAuth },
    /// Queue removal of every enrolled MOK
    MokReset { auth: MokAuth },
}

impl HelperRequest {
    /// Short operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::SignModule { .. } => "sign-module",
            Self::SignBootImage { .. } => "sign-boot-image",
            Self::RebuildInitrd { .. } => "rebuild-initrd",
            Self::MokListing => "mok-listing",
            Self::MokImport { .. } => "mok-import",
            Self::MokDelete { .. } => "mok-delete",
            Self::MokReset { .. } => "mok-reset",
        }
    }
}

/// Error classes that survive the process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WireError {
    ToolMissing { tool: String },
    ToolFailed { tool: String, status: String, stderr: String },
    NotFound { what: String },
    Other { message: String },
}

impl From<TrustError> for WireError {
    fn from(e: TrustError) -> Self {
        match e {
            TrustError::ToolMissing { tool } => Self::ToolMissing { tool },
            TrustError::ToolFailed { tool, status, stderr } => Self::ToolFailed { tool, status, stderr },
            TrustError::NotFound(what) => Self::NotFound { what },
            other => Self::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<WireError> for TrustError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::ToolMissing { tool } => Self::ToolMissing { tool },
            WireError::ToolFailed { tool, status, stderr } => Self::ToolFailed { tool, status, stderr },
            WireError::NotFound { what } => Self::NotFound(what),
            WireError::Other { message } => Self::Protocol(message),
        }
    }
}

/// Helper replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum HelperResponse {
    /// Sent once at startup
    Ready { version: u32, pid: u32 },
    /// Operation succeeded
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Reply to [`HelperRequest::MokListing`]
    Listing { listing: MokListing },
    /// Operation failed
    Failed { error: WireError },
}

impl HelperResponse {
    /// Success with no detail.
    #[must_use]
    pub const fn done() -> Self {
        Self::Done { detail: None }
    }

    /// Failure carrying `e`.
    #[must_use]
    pub fn failed(e: TrustError) -> Self {
        Self::Failed { error: e.into() }
    }

    /// Turn a `Failed` reply back into an error.
    ///
    /// # Errors
    ///
    /// The carried error for `Failed`.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Failed { error } => Err(error.into()),
            other => Ok(other),
        }
    }

    /// Extract a MOK listing.
    ///
    /// # Errors
    ///
    /// The carried error for `Failed`, `Protocol` for any other reply.
    pub fn into_listing(self) -> Result<MokListing> {
        match self.into_result()? {
            Self::Listing { listing } => Ok(listing),
            other => Err(TrustError::Protocol(format!(
                "expected a MOK listing, got {other:?}"
            ))),
        }
    }
}

/// Encode one message as a protocol line (newline included).
///
/// # Errors
///
/// `Json` if serialization fails.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line.
///
/// # Errors
///
/// `Protocol` if the line is not a valid message.
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim_end())
        .map_err(|e| TrustError::Protocol(format!("malformed message: {e}")))
}
