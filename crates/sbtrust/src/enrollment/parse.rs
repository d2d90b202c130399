//! Parsing of `mokutil --list-enrolled` / `--list-new` output.

use sbtrust_core::MokKey;

use crate::hash::normalize_fingerprint;

/// Split a MOK listing into keys.
///
/// Each key starts with a `[key N]` header; the certificate dump that follows
/// is scanned for the fingerprint, subject, issuer and validity lines.
#[must_use]
pub fn parse_mok_list(output: &str) -> Vec<MokKey> {
    let mut keys = Vec::new();
    let mut current: Option<MokKey> = None;

    for raw in output.lines() {
        let line = raw.trim();

        if let Some(index) = line.strip_prefix("[key ").and_then(|r| r.strip_suffix(']')) {
            keys.extend(current.take());
            current = Some(MokKey {
                index: index.trim().to_string(),
                ..MokKey::default()
            });
            continue;
        }

        let Some(key) = current.as_mut() else {
            continue;
        };

        if let Some(fp) = value_after(line, "SHA1 Fingerprint:") {
            key.sha1_fingerprint = Some(normalize_fingerprint(fp));
        } else if let Some(subject) = value_after(line, "Subject:") {
            key.subject = Some(subject.to_string());
        } else if let Some(issuer) = value_after(line, "Issuer:") {
            key.issuer = Some(issuer.to_string());
        } else if let Some(nb) = value_after(line, "Not Before:") {
            key.not_before = Some(nb.to_string());
        } else if let Some(na) = value_after(line, "Not After :").or_else(|| value_after(line, "Not After:")) {
            key.not_after = Some(na.to_string());
        } else if key.subject.is_none() && line.contains("CN=") {
            // short listings print the subject DN without a label
            key.subject = Some(line.to_string());
        }
    }

    keys.extend(current);
    keys
}

fn value_after<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.split_once(label).map(|(_, v)| v.trim())
}
