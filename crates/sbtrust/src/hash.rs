//! Fingerprints via `ring::digest`.

use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, SHA256};

/// SHA-256 of raw bytes (certificate DER data).
#[must_use]
pub fn sha256_bytes(data: &[u8]) -> String {
    let digest = ring::digest::digest(&SHA256, data);
    hex::encode(digest.as_ref())
}

/// SHA-1 of raw bytes.
///
/// `mokutil` identifies enrolled keys by their SHA-1 certificate fingerprint.
#[must_use]
pub fn sha1_bytes(data: &[u8]) -> String {
    let digest = ring::digest::digest(&SHA1_FOR_LEGACY_USE_ONLY, data);
    hex::encode(digest.as_ref())
}

/// Normalize a fingerprint as printed by tools (`AA:BB:..`, mixed case).
#[must_use]
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_bytes() {
        assert_eq!(
            sha256_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha1_bytes() {
        assert_eq!(
            sha1_bytes(b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_normalize_fingerprint() {
        assert_eq!(normalize_fingerprint("2A:AE:6C:35"), "2aae6c35");
        assert_eq!(normalize_fingerprint(" 2aae6c35 "), "2aae6c35");
    }
}
