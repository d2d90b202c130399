use serde::{Deserialize, Serialize};

/// One key block from a `mokutil --list-enrolled` / `--list-new` listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MokKey {
    /// Block header, e.g. `[key 1]`
    pub index: String,
    /// SHA-1 fingerprint, lowercase hex without separators
    #[serde(default)]
    pub sha1_fingerprint: Option<String>,
    /// Subject line
    #[serde(default)]
    pub subject: Option<String>,
    /// Issuer line
    #[serde(default)]
    pub issuer: Option<String>,
    /// Validity start as printed
    #[serde(default)]
    pub not_before: Option<String>,
    /// Validity end as printed
    #[serde(default)]
    pub not_after: Option<String>,
}

/// Enrolled and pending keys, fetched together by one privileged query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MokListing {
    /// Keys already enrolled in the MOK list
    pub enrolled: Vec<MokKey>,
    /// Keys queued for enrollment at next boot
    pub pending: Vec<MokKey>,
    /// Raw enrolled listing
    pub raw_enrolled: String,
    /// Raw pending listing
    pub raw_pending: String,
}

/// Whether our signing identity is trusted by the firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentStatus {
    /// One of our identities is in the enrolled set
    pub enrolled: bool,
    /// An enrollment request is queued and awaits the next boot
    pub pending: bool,
    /// Name of the identity (or historical marker) that matched
    pub matched_identity_name: Option<String>,
    /// Raw enrolled listing the verdict was derived from
    pub raw_listing: String,
}

/// How the MOK manager prompt at next boot is authorized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentSecret {
    /// One-time password the operator re-types in the firmware prompt
    OneTimePassword(String),
    /// Use the root password instead of a one-time password
    RootPassword,
}
