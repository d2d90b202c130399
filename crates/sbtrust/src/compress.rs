//! Module compression round-trip.
//!
//! A compressed module is expanded to a sibling `.ko`, operated on, and
//! packed back with the scheme it arrived in. The sibling never outlives
//! the round-trip, whether it succeeds or not. Repacking writes a
//! `.partial` file that is renamed over the original, so a failed
//! compressor leaves the original module as it was.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use sbtrust_core::{Compression, KernelModule, Result, TrustError};

use crate::exec::{CommandRunner, Invocation};

/// Tool invocation that expands `path` (compressed with `scheme`) into `out`.
fn decompress_invocation(scheme: Compression, path: &Path, out: &Path) -> Option<Invocation> {
    match scheme {
        Compression::None => None,
        Compression::Xz => Some(Invocation::new("xz").args(["-d", "-k", "-f", "-q"]).path_arg(path)),
        Compression::Gz => Some(Invocation::new("gzip").args(["-d", "-k", "-f", "-q"]).path_arg(path)),
        Compression::Zst => Some(
            Invocation::new("zstd")
                .args(["-d", "-f", "-q"])
                .path_arg(path)
                .arg("-o")
                .path_arg(out),
        ),
    }
}

const PARTIAL: &str = "partial";

/// Tool invocation that packs `plain` into `<plain>.<ext>.partial`, keeping
/// `plain`.
fn compress_invocation(scheme: Compression, plain: &Path) -> Option<Invocation> {
    let ext = scheme.extension()?;
    let suffix = format!(".{ext}.{PARTIAL}");
    match scheme {
        Compression::None => None,
        // kernel modules must use crc32; the in-kernel xz decoder has no crc64
        Compression::Xz => Some(
            Invocation::new("xz")
                .args(["--check=crc32", "--lzma2=dict=1MiB", "-k", "-f", "-q", "-S"])
                .arg(suffix)
                .path_arg(plain),
        ),
        Compression::Gz => Some(
            Invocation::new("gzip")
                .args(["-9", "-k", "-f", "-q", "-S"])
                .arg(suffix)
                .path_arg(plain),
        ),
        Compression::Zst => Some(
            Invocation::new("zstd")
                .args(["-f", "-q"])
                .path_arg(plain)
                .arg("-o")
                .path_arg(&partial_path(plain, scheme)),
        ),
    }
}

fn compressed_path(plain: &Path, scheme: Compression) -> PathBuf {
    scheme.extension().map_or_else(
        || plain.to_path_buf(),
        |ext| PathBuf::from(format!("{}.{ext}", plain.display())),
    )
}

fn partial_path(plain: &Path, scheme: Compression) -> PathBuf {
    PathBuf::from(format!("{}.{PARTIAL}", compressed_path(plain, scheme).display()))
}

/// Remove a file, ignoring "already gone".
pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove intermediate file"),
    }
}

/// Expand a module into its sibling `.ko` and return that path.
///
/// Uncompressed modules are returned unchanged.
///
/// # Errors
///
/// `ToolMissing` or `ToolFailed` from the decompressor. The sibling is
/// removed before returning an error.
pub async fn decompress(runner: &dyn CommandRunner, module: &KernelModule) -> Result<PathBuf> {
    let plain = module.decompressed_path();
    let Some(inv) = decompress_invocation(module.compression, &module.path, &plain) else {
        return Ok(plain);
    };

    debug!(module = %module.path.display(), scheme = %module.compression, "decompressing module");
    match runner.run_checked(&inv).await {
        Ok(_) if plain.is_file() => Ok(plain),
        Ok(_) => Err(TrustError::NotFound(format!(
            "decompressed module {}",
            plain.display()
        ))),
        Err(e) => {
            remove_quietly(&plain).await;
            Err(e)
        }
    }
}

/// Pack `plain` back with `scheme`, replacing the original compressed file.
///
/// The original is only replaced by a rename once the compressor has
/// succeeded.
///
/// # Errors
///
/// `ToolMissing` or `ToolFailed` from the compressor, `Io` if the rename
/// fails. `plain` and the partial output are removed before returning an
/// error; the original compressed file is untouched.
pub async fn recompress(
    runner: &dyn CommandRunner,
    plain: &Path,
    scheme: Compression,
) -> Result<PathBuf> {
    let Some(inv) = compress_invocation(scheme, plain) else {
        return Ok(plain.to_path_buf());
    };
    let partial = partial_path(plain, scheme);
    let target = compressed_path(plain, scheme);

    let result = match runner.run_checked(&inv).await {
        Ok(_) => tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| TrustError::io(&target, e)),
        Err(e) => Err(e),
    };
    if result.is_err() {
        warn!(module = %target.display(), "recompression failed, original kept");
        remove_quietly(&partial).await;
    }
    remove_quietly(plain).await;
    result.map(|()| target)
}

/// Run `op` on the uncompressed form of `module`, then restore its scheme.
///
/// After this returns, the module exists only under its original name and
/// no `.ko` intermediate is left behind, whatever the outcome.
///
/// # Errors
///
/// The first error from decompression, `op`, or recompression.
pub async fn with_decompressed<F, Fut>(
    runner: &dyn CommandRunner,
    module: &KernelModule,
    op: F,
) -> Result<()>
where
    F: FnOnce(PathBuf) -> Fut + Send,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    let plain = decompress(runner, module).await?;
    if let Err(e) = op(plain.clone()).await {
        if module.compression.is_compressed() {
            remove_quietly(&plain).await;
        }
        return Err(e);
    }
    recompress(runner, &plain, module.compression).await?;
    Ok(())
}
