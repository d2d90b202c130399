//! Signing identity generation and inspection.
//!
//! An identity is three files under the keys directory: `<name>.priv`
//! (RSA-2048 private key, mode 0600), `<name>.der` (self-signed certificate
//! in the form `mokutil` and `sign-file` expect) and `<name>.pem` (the same
//! certificate for `sbsign`/`sbverify`).

use chrono::{DateTime, TimeZone, Utc};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use sbtrust_core::{CertificateSummary, HistoryAction, Result, SigningIdentity, TrustError};

use crate::exec::tools::require_tool;
use crate::exec::{CommandRunner, Invocation};
use crate::hash::{sha1_bytes, sha256_bytes};
use crate::history::HistoryLog;

/// Certificate validity, in days.
pub const CERT_VALIDITY_DAYS: u32 = 36500;

/// Common name used when the caller does not supply one.
#[must_use]
pub fn default_common_name(name: &str) -> String {
    format!("Kernel Module Signing Key - {name}")
}

/// Creates, loads and describes signing identities.
pub struct KeyManager {
    runner: Arc<dyn CommandRunner>,
    keys_dir: PathBuf,
    history: Arc<HistoryLog>,
}

impl KeyManager {
    pub fn new(runner: Arc<dyn CommandRunner>, keys_dir: impl Into<PathBuf>, history: Arc<HistoryLog>) -> Self {
        Self {
            runner,
            keys_dir: keys_dir.into(),
            history,
        }
    }

    /// Directory holding identities.
    #[must_use]
    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    /// Generate a new identity, overwriting any identity with the same name.
    ///
    /// # Errors
    ///
    /// `ToolMissing` without `openssl`, `ToolFailed` if generation fails,
    /// `Io` if the keys directory cannot be written.
    #[instrument(skip(self))]
    pub async fn generate(&self, name: &str, common_name: Option<&str>) -> Result<SigningIdentity> {
        let cn = common_name.map_or_else(|| default_common_name(name), ToString::to_string);
        let result = self.generate_files(name, &cn).await;
        let details = match &result {
            Ok(id) => serde_json::json!({
                "name": name,
                "common_name": cn,
                "certificate": id.cert_der_path,
            }),
            Err(e) => serde_json::json!({ "name": name, "common_name": cn, "error": e.to_string() }),
        };
        self.history
            .record(HistoryAction::GenerateKey, details, result.is_ok())
            .await;
        result
    }

    async fn generate_files(&self, name: &str, cn: &str) -> Result<SigningIdentity> {
        validate_name(name)?;
        require_tool(self.runner.as_ref(), "openssl")?;
        tokio::fs::create_dir_all(&self.keys_dir)
            .await
            .map_err(|e| TrustError::io(&self.keys_dir, e))?;

        let identity = self.identity_paths(name, cn.to_string(), Utc::now());

        let req = Invocation::new("openssl")
            .args(["req", "-new", "-x509", "-newkey", "rsa:2048", "-keyout"])
            .path_arg(&identity.private_key_path)
            .args(["-outform", "DER", "-out"])
            .path_arg(&identity.cert_der_path)
            .args(["-nodes", "-days"])
            .arg(CERT_VALIDITY_DAYS.to_string())
            .arg("-subj")
            .arg(format!("/CN={cn}/"));
        self.runner.run_checked(&req).await?;

        let to_pem = Invocation::new("openssl")
            .args(["x509", "-in"])
            .path_arg(&identity.cert_der_path)
            .args(["-inform", "DER", "-out"])
            .path_arg(&identity.cert_pem_path)
            .args(["-outform", "PEM"]);
        self.runner.run_checked(&to_pem).await?;

        tokio::fs::set_permissions(&identity.private_key_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| TrustError::io(&identity.private_key_path, e))?;

        info!(name, common_name = cn, "generated signing identity");
        Ok(identity)
    }

    /// Load an identity by name. `None` if none of its files exist.
    ///
    /// The returned identity may be incomplete; see [`KeyManager::require`].
    #[must_use]
    pub fn load(&self, name: &str) -> Option<SigningIdentity> {
        let probe = self.identity_paths(name, String::new(), Utc::now());
        let files = [&probe.private_key_path, &probe.cert_der_path, &probe.cert_pem_path];
        if !files.iter().any(|p| p.exists()) {
            return None;
        }

        let created_at = files
            .iter()
            .find_map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
            .map_or_else(Utc::now, DateTime::<Utc>::from);
        let common_name = std::fs::read(&probe.cert_der_path)
            .ok()
            .and_then(|der| common_name_of(&der))
            .unwrap_or_else(|| default_common_name(name));
        Some(SigningIdentity {
            common_name,
            created_at,
            ..probe
        })
    }

    /// Load an identity that is usable for signing.
    ///
    /// # Errors
    ///
    /// `KeyMissing` listing every absent file.
    pub fn require(&self, name: &str) -> Result<SigningIdentity> {
        let identity = self
            .load(name)
            .unwrap_or_else(|| self.identity_paths(name, default_common_name(name), Utc::now()));
        let missing = identity.missing_files();
        if missing.is_empty() {
            Ok(identity)
        } else {
            Err(TrustError::KeyMissing {
                name: name.to_string(),
                missing,
            })
        }
    }

    /// All identities with a certificate on disk, sorted by name.
    ///
    /// # Errors
    ///
    /// `Io` if the keys directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<SigningIdentity>> {
        if !self.keys_dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.keys_dir).map_err(|e| TrustError::io(&self.keys_dir, e))?;
        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "der"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names.iter().filter_map(|n| self.load(n)).collect())
    }

    /// Parse the identity's certificate.
    ///
    /// # Errors
    ///
    /// `Io` if no certificate can be read, `InvalidCertificate` if it does not parse.
    pub async fn describe(&self, identity: &SigningIdentity) -> Result<CertificateSummary> {
        let der = match tokio::fs::read(&identity.cert_der_path).await {
            Ok(der) => der,
            Err(e) => {
                debug!(path = %identity.cert_der_path.display(), error = %e, "DER unreadable, trying PEM");
                let pem_bytes = tokio::fs::read(&identity.cert_pem_path)
                    .await
                    .map_err(|e| TrustError::io(&identity.cert_pem_path, e))?;
                pem::parse(&pem_bytes)
                    .map_err(|e| TrustError::InvalidCertificate {
                        path: identity.cert_pem_path.display().to_string(),
                        reason: e.to_string(),
                    })?
                    .contents()
                    .to_vec()
            }
        };
        summarize_der(&der, &identity.cert_der_path)
    }

    fn identity_paths(&self, name: &str, common_name: String, created_at: DateTime<Utc>) -> SigningIdentity {
        SigningIdentity {
            name: name.to_string(),
            common_name,
            private_key_path: self.keys_dir.join(format!("{name}.priv")),
            cert_der_path: self.keys_dir.join(format!("{name}.der")),
            cert_pem_path: self.keys_dir.join(format!("{name}.pem")),
            created_at,
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\0']) {
        return Err(TrustError::Config(format!("invalid identity name '{name}'")));
    }
    Ok(())
}

/// Summarize a DER certificate.
///
/// # Errors
///
/// `InvalidCertificate` if `der` is not an X.509 certificate.
pub fn summarize_der(der: &[u8], source: &Path) -> Result<CertificateSummary> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| TrustError::InvalidCertificate {
        path: source.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(CertificateSummary {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
        not_before: asn1_to_utc(cert.validity().not_before),
        not_after: asn1_to_utc(cert.validity().not_after),
        sha256_fingerprint: sha256_bytes(der),
        sha1_fingerprint: sha1_bytes(der),
    })
}

/// First subject CN of a DER certificate.
#[must_use]
pub fn common_name_of(der: &[u8]) -> Option<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(ToString::to_string);
    if cn.is_none() {
        warn!("certificate has no readable common name");
    }
    cn
}

/// SHA-1 fingerprint of an identity's certificate, as `mokutil` prints it.
pub async fn sha1_fingerprint(identity: &SigningIdentity) -> Option<String> {
    tokio::fs::read(&identity.cert_der_path)
        .await
        .ok()
        .map(|der| sha1_bytes(&der))
}

/// Convert an ASN.1 `GeneralizedTime` / `UTCTime` to `DateTime<Utc>`.
fn asn1_to_utc(t: x509_parser::time::ASN1Time) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0)
        .single()
        .unwrap_or_else(Utc::now)
}
