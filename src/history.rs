//! Persisted scan history.
//!
//! The store is a JSON file holding an ordered array of [`ScanRecord`]s,
//! newest first, at most one per url. Every mutation rewrites the whole
//! file (write to a sibling `.tmp`, then rename, so a crash never leaves a
//! half-written history) and then fires a payload-free change notification.
//!
//! ## Why re-load instead of patching?
//!
//! Reads always parse the file fresh and notifications carry no data, so a
//! subscriber's only correct move is to call [`HistoryStore::load_all`]
//! again. That makes the file the single source of truth: a CLI invocation,
//! a long-running pipeline, and a test can all mutate the same history
//! without anyone holding a stale in-memory copy.
//!
//! Handles cloned from one store share the write lock and the notification
//! channel. Two stores opened independently on the same path still see each
//! other's records (reads are fresh) but do not hear each other's
//! notifications.

use crate::error::ScanError;
use crate::pipeline::normalize::normalize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Records retained by default before the oldest are dropped.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One scanned document: where it came from, what was extracted, and what
/// the analysis said.
///
/// `analysis` holds the raw service reply (or the fixed placeholder/failure
/// text); [`ScanRecord::formatted_analysis`] applies display normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub url: String,
    pub extracted_text: String,
    pub analysis: String,
}

impl ScanRecord {
    /// The analysis text normalized for rendering.
    pub fn formatted_analysis(&self) -> String {
        normalize(&self.analysis)
    }
}

struct HistoryInner {
    path: PathBuf,
    limit: Option<usize>,
    /// Serialises the read-modify-write cycle so interleaved upserts for
    /// different urls cannot lose each other's records.
    write_lock: Mutex<()>,
    changes: broadcast::Sender<()>,
}

/// Handle to a persisted history file. Clones share the same store.
#[derive(Clone)]
pub struct HistoryStore {
    inner: Arc<HistoryInner>,
}

impl HistoryStore {
    /// Open a store at `path` with the default retention cap.
    ///
    /// The file is not created until the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_limit(path, Some(DEFAULT_HISTORY_LIMIT))
    }

    /// Open a store with an explicit retention cap (`None` = unlimited).
    pub fn with_limit(path: impl Into<PathBuf>, limit: Option<usize>) -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(HistoryInner {
                path: path.into(),
                limit,
                write_lock: Mutex::new(()),
                changes,
            }),
        }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Parse the full history fresh from disk, newest first.
    ///
    /// An absent or unparsable file is an empty history.
    pub fn load_all(&self) -> Vec<ScanRecord> {
        let bytes = match std::fs::read(&self.inner.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "History file '{}' unreadable, treating as empty: {}",
                        self.inner.path.display(),
                        e
                    );
                }
                return Vec::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    "History file '{}' unparsable, treating as empty: {}",
                    self.inner.path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// The stored record for `url`, if any.
    pub fn find(&self, url: &str) -> Option<ScanRecord> {
        self.load_all().into_iter().find(|r| r.url == url)
    }

    /// Insert or replace the record for `record.url` at the front,
    /// persist, and notify subscribers.
    pub async fn upsert(&self, record: ScanRecord) -> Result<(), ScanError> {
        let _guard = self.inner.write_lock.lock().await;
        let mut records = self.load_all();
        records.retain(|r| r.url != record.url);
        records.insert(0, record);
        if let Some(limit) = self.inner.limit {
            records.truncate(limit);
        }
        self.persist(&records).await?;
        let _ = self.inner.changes.send(());
        Ok(())
    }

    /// Remove the record for `url`, persist, and notify subscribers.
    ///
    /// Returns whether a record was actually removed. The persist and the
    /// notification happen either way, so callers see a consistent file.
    pub async fn delete(&self, url: &str) -> Result<bool, ScanError> {
        let _guard = self.inner.write_lock.lock().await;
        let mut records = self.load_all();
        let before = records.len();
        records.retain(|r| r.url != url);
        let removed = records.len() != before;
        self.persist(&records).await?;
        let _ = self.inner.changes.send(());
        Ok(removed)
    }

    /// Subscribe to change notifications.
    ///
    /// One notification fires after every successful mutation through any
    /// clone of this store. Receivers that fall behind see a lag error and
    /// should simply re-load.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.changes.subscribe()
    }

    /// The change notifications as a `Stream`, for `select!`-style loops.
    pub fn changes(&self) -> BroadcastStream<()> {
        BroadcastStream::new(self.subscribe())
    }

    async fn persist(&self, records: &[ScanRecord]) -> Result<(), ScanError> {
        let path = &self.inner.path;
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| ScanError::Internal(format!("Failed to serialize history: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ScanError::HistoryPersist {
                        path: path.clone(),
                        source: e,
                    })?;
            }
        }

        // Write-then-rename keeps readers from ever seeing a partial file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| ScanError::HistoryPersist {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| ScanError::HistoryPersist {
                path: path.clone(),
                source: e,
            })?;

        debug!("Persisted {} history records to {}", records.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn record(url: &str, analysis: &str) -> ScanRecord {
        ScanRecord {
            url: url.to_string(),
            extracted_text: format!("text of {url}"),
            analysis: analysis.to_string(),
        }
    }

    fn store_in(dir: &TempDir) -> HistoryStore {
        HistoryStore::open(dir.path().join("history.json"))
    }

    #[tokio::test]
    async fn upsert_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.upsert(record("https://a", "first")).await.unwrap();
        let records = store.load_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://a");
        assert_eq!(records[0].analysis, "first");
    }

    #[tokio::test]
    async fn upsert_replaces_same_url_and_moves_it_to_front() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.upsert(record("https://a", "old")).await.unwrap();
        store.upsert(record("https://b", "other")).await.unwrap();
        store.upsert(record("https://a", "new")).await.unwrap();

        let records = store.load_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://a");
        assert_eq!(records[0].analysis, "new");
        assert_eq!(records[1].url, "https://b");
    }

    #[tokio::test]
    async fn delete_removes_only_the_target_and_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        for url in ["https://a", "https://b", "https://c"] {
            store.upsert(record(url, "x")).await.unwrap();
        }
        let removed = store.delete("https://b").await.unwrap();
        assert!(removed);

        let urls: Vec<_> = store.load_all().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://c", "https://a"]);
    }

    #[tokio::test]
    async fn delete_of_unknown_url_reports_false_but_still_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let removed = store.delete("https://ghost").await.unwrap();
        assert!(!removed);
        // The file now exists and holds an empty history.
        assert!(store.path().exists());
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn absent_file_is_an_empty_history() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load_all().is_empty());
    }

    #[tokio::test]
    async fn unparsable_file_is_an_empty_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        tokio::fs::write(&path, b"{ not json ").await.unwrap();

        let store = HistoryStore::open(&path);
        assert!(store.load_all().is_empty());
    }

    #[tokio::test]
    async fn every_mutation_notifies_subscribers() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut rx = store.subscribe();

        store.upsert(record("https://a", "x")).await.unwrap();
        rx.recv().await.unwrap();

        store.delete("https://a").await.unwrap();
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn cloned_handles_share_notifications() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut rx = store.subscribe();

        let writer = store.clone();
        writer.upsert(record("https://a", "x")).await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(store.load_all().len(), 1);
    }

    #[tokio::test]
    async fn changes_stream_delivers_notifications() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut changes = store.changes();

        store.upsert(record("https://a", "x")).await.unwrap();
        assert!(matches!(changes.next().await, Some(Ok(()))));
    }

    #[tokio::test]
    async fn retention_cap_drops_the_oldest() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::with_limit(dir.path().join("history.json"), Some(2));

        for url in ["https://a", "https://b", "https://c"] {
            store.upsert(record(url, "x")).await.unwrap();
        }
        let urls: Vec<_> = store.load_all().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://c", "https://b"]);
    }

    #[tokio::test]
    async fn load_all_sees_external_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let store = HistoryStore::open(&path);
        store.upsert(record("https://a", "x")).await.unwrap();

        // Another process rewrites the file behind our back.
        let external = vec![record("https://external", "y")];
        tokio::fs::write(&path, serde_json::to_vec(&external).unwrap())
            .await
            .unwrap();

        let records = store.load_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://external");
    }

    #[test]
    fn records_persist_with_camel_case_field_names() {
        let json = serde_json::to_string(&record("https://a", "fine")).unwrap();
        assert!(json.contains("\"extractedText\""), "got: {json}");
        assert!(json.contains("\"url\""));
        assert!(json.contains("\"analysis\""));
    }

    #[test]
    fn formatted_analysis_normalizes_for_display() {
        let rec = record("https://a", "# Summary\r\n\r\n\r\nGood product.\n\n\n\nClean.");
        assert_eq!(
            rec.formatted_analysis(),
            "# Summary\nGood product.\n\nClean."
        );
    }
}
