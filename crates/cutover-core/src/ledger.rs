//! File-backed append-only WAL ledger.
//!
//! Entries are written to `ledger/{namespace}/{date}/{timestamp}-{entry_id}.json`
//! under the configured root, where:
//! - `date` is `YYYY-MM-DD` (UTC), used for partitioning/list efficiency
//! - `timestamp` is RFC 3339 (UTC)
//!
//! One file per entry, created with `create_new` semantics so an append can
//! never overwrite an existing entry. A duplicate append of the same entry
//! ID is a no-op.
//!
//! This sink is durable for a single node. Multi-node deployments should
//! implement [`WalSink`] over shared storage instead.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::SecondsFormat;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::id::WalEntryId;
use crate::wal::{WalEntry, WalSink};

/// Writes WAL entries to append-only JSON files.
#[derive(Debug)]
pub struct JsonLedgerSink {
    root: PathBuf,
    sequence: AtomicU64,
}

impl JsonLedgerSink {
    /// Creates a ledger sink rooted at the given directory.
    ///
    /// The directory is created lazily on first append. The per-sink
    /// sequence restarts at zero for each process; cross-restart ordering is
    /// carried by the lexicographically sortable entry IDs.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Returns the ledger root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, entry: &WalEntry) -> PathBuf {
        let date = entry.recorded_at.format("%Y-%m-%d").to_string();
        let timestamp = entry
            .recorded_at
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        self.root
            .join("ledger")
            .join(&entry.namespace)
            .join(date)
            .join(format!("{timestamp}-{}.json", entry.id))
    }
}

#[async_trait::async_trait]
impl WalSink for JsonLedgerSink {
    #[tracing::instrument(
        skip(self, entry),
        fields(
            namespace = %entry.namespace,
            target = %entry.target,
            entry_id = %entry.id,
            operation = entry.payload.operation()
        )
    )]
    async fn record(&self, mut entry: WalEntry) -> Result<WalEntryId> {
        entry.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let path = self.entry_path(&entry);
        let parent = path.parent().ok_or_else(|| {
            Error::wal_append(format!("ledger path has no parent: {}", path.display()))
        })?;

        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            Error::wal_append_with_source(
                format!("failed to create ledger directory {}", parent.display()),
                e,
            )
        })?;

        let json = serde_json::to_vec(&entry).map_err(|e| Error::Serialization {
            message: format!("failed to serialize WAL entry: {e}"),
        })?;

        let open = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        let mut file = match open {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "duplicate ledger append ignored");
                return Ok(entry.id);
            }
            Err(e) => {
                return Err(Error::wal_append_with_source(
                    format!("failed to create ledger file {}", path.display()),
                    e,
                ));
            }
        };

        file.write_all(&json).await.map_err(|e| {
            Error::wal_append_with_source(
                format!("failed to write ledger file {}", path.display()),
                e,
            )
        })?;
        file.sync_all().await.map_err(|e| {
            Error::wal_append_with_source(
                format!("failed to sync ledger file {}", path.display()),
                e,
            )
        })?;

        Ok(entry.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalPayload;

    fn status_entry(policy_id: &str, status: &str) -> WalEntry {
        WalEntry::new(
            "policy_tracking",
            "policy_tracking_queue",
            WalPayload::UpdateMigrationStatus {
                policy_id: policy_id.into(),
                status: status.into(),
                wave_id: None,
            },
        )
    }

    #[tokio::test]
    async fn appends_one_file_per_entry() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| Error::storage(e.to_string()))?;
        let sink = JsonLedgerSink::new(dir.path());

        sink.record(status_entry("POL-1", "in_progress")).await?;
        sink.record(status_entry("POL-2", "completed")).await?;

        let namespace_dir = dir.path().join("ledger").join("policy_tracking");
        let mut files = Vec::new();
        let mut dates = tokio::fs::read_dir(&namespace_dir)
            .await
            .map_err(|e| Error::storage(e.to_string()))?;
        while let Some(date_dir) = dates
            .next_entry()
            .await
            .map_err(|e| Error::storage(e.to_string()))?
        {
            let mut entries = tokio::fs::read_dir(date_dir.path())
                .await
                .map_err(|e| Error::storage(e.to_string()))?;
            while let Some(file) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage(e.to_string()))?
            {
                files.push(file.path());
            }
        }
        assert_eq!(files.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn written_entries_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| Error::storage(e.to_string()))?;
        let sink = JsonLedgerSink::new(dir.path());

        let entry = status_entry("POL-1", "in_progress");
        let path = sink.entry_path(&entry);
        sink.record(entry).await?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::storage(e.to_string()))?;
        let back: WalEntry = serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
            message: e.to_string(),
        })?;

        assert_eq!(back.namespace, "policy_tracking");
        assert_eq!(back.sequence, 1);
        assert!(matches!(
            back.payload,
            WalPayload::UpdateMigrationStatus { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_append_is_noop() -> Result<()> {
        let dir = tempfile::tempdir().map_err(|e| Error::storage(e.to_string()))?;
        let sink = JsonLedgerSink::new(dir.path());

        let entry = status_entry("POL-1", "in_progress");
        let first = sink.record(entry.clone()).await?;
        let second = sink.record(entry).await?;
        assert_eq!(first, second);

        Ok(())
    }
}
