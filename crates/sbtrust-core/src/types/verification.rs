use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of sampling a set of modules for signatures.
///
/// `is_signed` is a statistical approximation: only `checked` files were
/// inspected, and the verdict compares the signed ratio to a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleReport {
    /// Sampled modules carrying a signature
    pub signed: usize,
    /// Sampled modules without one
    pub unsigned: usize,
    /// Sample size actually checked
    pub checked: usize,
    /// `signed / checked >= threshold`
    pub is_signed: bool,
}

impl SampleReport {
    /// Build a report and apply `threshold`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(signed: usize, checked: usize, threshold: f64) -> Self {
        let is_signed = checked > 0 && (signed as f64 / checked as f64) >= threshold;
        Self {
            signed,
            unsigned: checked.saturating_sub(signed),
            checked,
            is_signed,
        }
    }

    /// Signed ratio, 0.0 when nothing was checked.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            self.signed as f64 / self.checked as f64
        }
    }
}

/// Direct (unsampled) boot-image verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BootImageCheck {
    /// Signature verifies against our certificate
    Signed,
    /// No valid signature from our certificate
    Unsigned,
    /// Architecture does not use PE/COFF boot images
    Unsupported,
    /// Check could not run (tool missing, no image, no identity)
    Unavailable {
        /// Why
        reason: String,
    },
}

/// Signature details of a single module, as reported by `modinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSignature {
    /// Module that was inspected
    pub path: PathBuf,
    /// Whether the module carries an appended signature
    pub signed: bool,
    /// Signature container type, e.g. `PKCS#7`
    pub sig_id: Option<String>,
    /// Signer common name
    pub signer: Option<String>,
    /// Key identifier of the signing key
    pub sig_key: Option<String>,
    /// Digest used for the signature
    pub sig_hashalgo: Option<String>,
}

impl ModuleSignature {
    /// Parse the `key: value` lines of a full `modinfo` listing.
    ///
    /// Continuation lines (multi-line key ids) are folded into the previous
    /// value.
    #[must_use]
    pub fn from_modinfo(path: PathBuf, sig_id: Option<String>, info: &str) -> Self {
        let mut fields: Vec<(&str, String)> = Vec::new();
        for line in info.lines() {
            if let Some((key, value)) = line.split_once(':').filter(|(k, _)| !k.starts_with(char::is_whitespace)) {
                fields.push((key.trim(), value.trim().to_string()));
            } else if let Some((_, value)) = fields.last_mut() {
                value.push_str(line.trim());
            }
        }
        let field = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };
        Self {
            path,
            signed: sig_id.is_some(),
            signer: field("signer"),
            sig_key: field("sig_key"),
            sig_hashalgo: field("sig_hashalgo"),
            sig_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary_is_inclusive() {
        assert!(SampleReport::evaluate(19, 20, 0.95).is_signed);
        assert!(!SampleReport::evaluate(18, 20, 0.95).is_signed);
        assert!(SampleReport::evaluate(95, 100, 0.95).is_signed);
        assert!(!SampleReport::evaluate(949_999, 1_000_000, 0.95).is_signed);
    }

    #[test]
    fn empty_sample_is_never_signed() {
        let r = SampleReport::evaluate(0, 0, 0.5);
        assert!(!r.is_signed);
        assert!(r.ratio().abs() < f64::EPSILON);
    }

    #[test]
    fn parses_signer_and_folds_wrapped_key_id() {
        let info = "filename:       /tmp/a.ko\n\
                    signer:         sbtrust MOK\n\
                    sig_key:        1A:2B:3C:\n\
                    \t\t4D:5E\n\
                    sig_hashalgo:   sha256\n";
        let sig = ModuleSignature::from_modinfo(PathBuf::from("/tmp/a.ko"), Some("PKCS#7".into()), info);
        assert!(sig.signed);
        assert_eq!(sig.signer.as_deref(), Some("sbtrust MOK"));
        assert_eq!(sig.sig_key.as_deref(), Some("1A:2B:3C:4D:5E"));
        assert_eq!(sig.sig_hashalgo.as_deref(), Some("sha256"));
    }

    #[test]
    fn unsigned_module_has_no_signature_fields() {
        let sig = ModuleSignature::from_modinfo(PathBuf::from("b.ko"), None, "filename: b.ko\nlicense: GPL\n");
        assert!(!sig.signed);
        assert_eq!(sig.signer, None);
        assert_eq!(sig.sig_key, None);
    }
}
