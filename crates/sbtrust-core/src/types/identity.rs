use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A self-signed code-signing identity stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningIdentity {
    /// Identity name (file stem under the keys directory)
    pub name: String,
    /// Certificate subject common name
    pub common_name: String,
    /// RSA private key (PEM)
    pub private_key_path: PathBuf,
    /// Certificate in DER form, used by module signing and MOK import
    pub cert_der_path: PathBuf,
    /// Certificate in PEM form, used by boot-image signing
    pub cert_pem_path: PathBuf,
    /// When the key material was written
    pub created_at: DateTime<Utc>,
}

impl SigningIdentity {
    /// Files that must exist for this identity to be usable but do not.
    #[must_use]
    pub fn missing_files(&self) -> Vec<PathBuf> {
        [
            &self.private_key_path,
            &self.cert_der_path,
            &self.cert_pem_path,
        ]
        .into_iter()
        .filter(|p| !p.is_file())
        .cloned()
        .collect()
    }

    /// Key and both certificate encodings are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_files().is_empty()
    }
}

/// Parsed certificate details of an identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSummary {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number (hex)
    pub serial: String,
    /// Not valid before
    pub not_before: DateTime<Utc>,
    /// Not valid after
    pub not_after: DateTime<Utc>,
    /// SHA-256 of the DER encoding (hex)
    pub sha256_fingerprint: String,
    /// SHA-1 of the DER encoding (hex), as printed by mokutil
    pub sha1_fingerprint: String,
}
