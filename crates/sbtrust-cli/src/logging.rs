//! Tracing subscriber setup.
//!
//! Events go to a plaintext `debug.log` under the state directory, and to
//! stderr with `--verbose`. Nothing is ever written to stdout: the privileged
//! helper uses it as its protocol channel.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,sbtrust=debug,sbtrust_cli=debug";

/// Install the global subscriber. `log_file` is skipped silently if it
/// cannot be opened; a second call is a no-op.
pub fn init(log_file: Option<&Path>, verbose: bool) {
    let file_layer = log_file.and_then(open_log).map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(env_filter())
    });

    let stderr_layer = verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(LevelFilter::DEBUG)
    });

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn open_log(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/debug.log");
        assert!(open_log(&path).is_some());
        assert!(path.exists());
    }
}
