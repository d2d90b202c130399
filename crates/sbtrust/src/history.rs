//! Persisted audit trail of state-changing operations.

use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

use sbtrust_core::{HistoryAction, HistoryEntry, Result, TrustError};

/// Capped, newest-first JSON log.
pub struct HistoryLog {
    path: PathBuf,
    cap: usize,
    write_lock: Mutex<()>,
}

impl HistoryLog {
    /// Log stored at `path`, keeping at most `cap` entries.
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            path: path.into(),
            cap: cap.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, newest first. A missing or corrupt file reads as empty.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "history file unreadable, starting fresh");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    /// Up to `limit` newest entries.
    pub async fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let mut entries = self.entries().await;
        entries.truncate(limit);
        entries
    }

    /// Prepend an entry and persist.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Io` if the log cannot be written.
    pub async fn append(&self, entry: HistoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.entries().await;
        entries.insert(0, entry);
        entries.truncate(self.cap);
        self.persist(&entries).await
    }

    /// Record an action; a write failure is logged, never propagated, so it
    /// cannot mask the outcome of the operation being recorded.
    pub async fn record(&self, action: HistoryAction, details: serde_json::Value, success: bool) {
        if let Err(e) = self
            .append(HistoryEntry::now(action, details, success))
            .await
        {
            warn!(action = %action, error = %e, "failed to record history entry");
        }
    }

    /// Drop every entry; the clearing itself becomes the first entry.
    ///
    /// # Errors
    ///
    /// Returns `TrustError::Io` if the log cannot be written.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let previous = self.entries().await.len();
        let entry = HistoryEntry::now(
            HistoryAction::ClearHistory,
            serde_json::json!({ "removed_entries": previous }),
            true,
        );
        self.persist(&[entry]).await
    }

    async fn persist(&self, entries: &[HistoryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TrustError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| TrustError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| TrustError::io(&self.path, e))
    }
}
