//! Boot image matching.
//!
//! Packaging tools do not always name the boot image after the exact kernel
//! release (`vmlinuz-6.9.1` for a `6.9.1-custom` tree, local version
//! suffixes dropped or reordered). When no exact match exists this falls
//! back to a best-effort similarity score; a wrong pick is possible and is
//! reported through [`BootImageMatch::match_confidence`].

use std::path::Path;
use tracing::debug;

use sbtrust_core::BootImageMatch;

use super::base_version;

/// Names ending in these are backups or in-flight files, never boot images.
pub const IGNORED_SUFFIXES: &[&str] = &[
    ".bak",
    ".old",
    ".orig",
    ".unsigned",
    ".tmp",
    ".signed",
    ".dpkg-tmp",
    ".dpkg-new",
];

/// Find the boot image for `kernel_version` in `boot_dir`.
///
/// `vmlinuz-<version>` wins outright with confidence
/// [`BootImageMatch::EXACT`]. Otherwise every `vmlinuz-<base>*` file is
/// scored with [`score_candidate`] and the first strictly best one (in name
/// order) is returned.
#[must_use]
pub fn find_boot_image(boot_dir: &Path, kernel_version: &str) -> Option<BootImageMatch> {
    let exact = boot_dir.join(format!("vmlinuz-{kernel_version}"));
    if exact.is_file() {
        return Some(BootImageMatch {
            path: exact,
            match_confidence: BootImageMatch::EXACT,
        });
    }

    let prefix = format!("vmlinuz-{}", base_version(kernel_version).unwrap_or(kernel_version));
    let mut names: Vec<String> = std::fs::read_dir(boot_dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(&prefix))
        .filter(|name| !IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s)))
        .collect();
    names.sort();

    let mut best: Option<(u32, String)> = None;
    for name in names {
        let score = score_candidate(&name, kernel_version);
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((score, name));
        }
    }

    best.map(|(score, name)| {
        debug!(kernel = kernel_version, candidate = %name, score, "fuzzy boot image match");
        BootImageMatch {
            path: boot_dir.join(name),
            match_confidence: score,
        }
    })
}

/// Number of hyphen-separated segments of `kernel_version` that occur in
/// `file_name`.
#[must_use]
pub fn score_candidate(file_name: &str, kernel_version: &str) -> u32 {
    let hits = kernel_version
        .split('-')
        .filter(|segment| !segment.is_empty() && file_name.contains(segment))
        .count();
    u32::try_from(hits).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_with(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), b"MZ").unwrap();
        }
        dir
    }

    #[test]
    fn exact_match_is_full_confidence() {
        let dir = boot_with(&["vmlinuz-6.9.1-custom", "vmlinuz-6.9.1"]);
        let m = find_boot_image(dir.path(), "6.9.1-custom").unwrap();
        assert!(m.is_exact());
        assert!(m.path.ends_with("vmlinuz-6.9.1-custom"));
    }

    #[test]
    fn best_scoring_candidate_wins() {
        let dir = boot_with(&[
            "vmlinuz-6.9.1",
            "vmlinuz-6.9.1-lab-custom",
            "vmlinuz-6.9.1-lab-custom.old",
            "vmlinuz-6.9.1-lab-custom-x86.unsigned",
        ]);
        let m = find_boot_image(dir.path(), "6.9.1-lab-custom-2").unwrap();
        assert!(m.path.ends_with("vmlinuz-6.9.1-lab-custom"));
        assert_eq!(m.match_confidence, 3);
    }

    #[test]
    fn ties_keep_the_first_name() {
        let dir = boot_with(&["vmlinuz-6.9.1-b", "vmlinuz-6.9.1-a"]);
        let m = find_boot_image(dir.path(), "6.9.1-zzz").unwrap();
        assert!(m.path.ends_with("vmlinuz-6.9.1-a"));
    }

    #[test]
    fn no_candidates() {
        let dir = boot_with(&["vmlinuz-6.8.0", "vmlinuz-6.9.1.bak"]);
        assert!(find_boot_image(dir.path(), "6.9.1-custom").is_none());
        assert!(find_boot_image(Path::new("/nonexistent/boot"), "6.9.1").is_none());
    }

    #[test]
    fn scoring_counts_segments() {
        assert_eq!(score_candidate("vmlinuz-6.8.0-45-generic", "6.8.0-45-generic"), 3);
        assert_eq!(score_candidate("vmlinuz-6.8.0", "6.8.0-45-generic"), 1);
    }
}
