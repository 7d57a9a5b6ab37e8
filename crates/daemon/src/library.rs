//! Library service for vidshrink
//!
//! Ties the scanner, reconciliation, converter and store together. Every
//! operation runs to completion before returning; blocking work (directory
//! walks, encodes) is moved onto tokio's blocking pool.

use crate::config::Config;
use crate::converter::{ConversionState, Converter};
use crate::reconcile::{self, ReconcileError};
use crate::record::FileRecord;
use crate::scan::scan_directory;
use crate::store::{Setting, Store, StoreError, StoreStats};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Error type for library operations
#[derive(Debug, Error)]
pub enum LibraryError {
    /// No record is stored under the given path
    #[error("File not found: {0}")]
    NotFound(String),

    /// Store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Reconciliation failure
    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for LibraryError {
    fn from(e: tokio::task::JoinError) -> Self {
        LibraryError::Task(e.to_string())
    }
}

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Video files found on disk
    pub discovered: usize,
    /// Of those, files not previously tracked
    pub inserted: usize,
}

/// Counts from one processing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub attempted: usize,
    pub converted: usize,
    pub retained: usize,
    pub failed: usize,
}

impl ProcessSummary {
    fn record(&mut self, state: &ConversionState) {
        self.attempted += 1;
        match state {
            ConversionState::Replaced => self.converted += 1,
            ConversionState::Retained => self.retained += 1,
            _ => self.failed += 1,
        }
    }
}

/// The tracked video library
#[derive(Debug, Clone)]
pub struct Library {
    store: Store,
    converter: Converter,
    root_dir: PathBuf,
}

impl Library {
    pub fn new(store: Store, converter: Converter, root_dir: PathBuf) -> Self {
        Self {
            store,
            converter,
            root_dir,
        }
    }

    /// Library using the configured ffmpeg encoder and root directory
    pub fn from_config(store: Store, config: &Config) -> Self {
        Self::new(
            store,
            Converter::from_config(&config.encoder),
            config.library.root_dir.clone(),
        )
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub async fn list_files(&self) -> Result<Vec<FileRecord>, LibraryError> {
        Ok(self.store.list_all().await?)
    }

    /// Scan `dir` (or the library root) and track every new video file.
    ///
    /// Files already tracked under the same path are left as they are, so
    /// rescanning an unchanged tree inserts nothing.
    pub async fn scan(&self, dir: Option<&Path>) -> Result<ScanSummary, LibraryError> {
        let root = dir.unwrap_or(self.root_dir.as_path()).to_path_buf();
        let records = tokio::task::spawn_blocking(move || scan_directory(&root)).await?;

        let mut summary = ScanSummary {
            discovered: records.len(),
            inserted: 0,
        };

        for record in records {
            if self.store.insert_if_absent(&record).await? {
                debug!("Tracking new file: {}", record.path);
                summary.inserted += 1;
            }
        }

        info!(
            "Scan complete: {} discovered, {} new",
            summary.discovered, summary.inserted
        );
        Ok(summary)
    }

    /// Reconcile stored records with the filesystem; returns those that changed.
    pub async fn check(&self) -> Result<Vec<FileRecord>, LibraryError> {
        Ok(reconcile::check(&self.store).await?)
    }

    /// Convert every record that is neither converted nor deleted, one at a time.
    pub async fn process_all(&self) -> Result<ProcessSummary, LibraryError> {
        let pending = self.store.list_by(false, false).await?;
        info!("Processing {} files", pending.len());

        let mut summary = ProcessSummary::default();
        for record in pending {
            let (_, state) = self.process_record(record).await?;
            summary.record(&state);
        }

        info!(
            "Processing complete: {} attempted, {} converted, {} retained, {} failed",
            summary.attempted, summary.converted, summary.retained, summary.failed
        );
        Ok(summary)
    }

    /// Convert the record stored under `path`.
    ///
    /// Returns `NotFound` without touching the store when the path is not
    /// tracked. A soft-deleted record is returned as stored.
    pub async fn process_single(&self, path: &str) -> Result<FileRecord, LibraryError> {
        let record = self
            .store
            .get_by_path(path)
            .await?
            .ok_or_else(|| LibraryError::NotFound(path.to_string()))?;

        if record.deleted {
            info!("Skipping deleted file: {}", record.path);
            return Ok(record);
        }

        let (record, _) = self.process_record(record).await?;
        Ok(record)
    }

    async fn process_record(
        &self,
        mut record: FileRecord,
    ) -> Result<(FileRecord, ConversionState), LibraryError> {
        let converter = self.converter.clone();
        let input = record.path_buf();
        let outcome = tokio::task::spawn_blocking(move || converter.convert(&input)).await?;

        let old_id = record.id.clone();
        outcome.apply(&mut record);
        self.store.replace_path(&old_id, &record).await?;

        debug!("{}: {}", record.path, outcome.state.as_str());
        Ok((record, outcome.state))
    }

    pub async fn stats(&self) -> Result<StoreStats, LibraryError> {
        Ok(self.store.stats().await?)
    }

    pub async fn compact(&self) -> Result<(), LibraryError> {
        Ok(self.store.compact().await?)
    }

    pub async fn settings(&self) -> Result<Vec<Setting>, LibraryError> {
        Ok(self.store.list_settings().await?)
    }

    pub async fn put_setting(&self, key: &str, value: &str) -> Result<(), LibraryError> {
        Ok(self.store.put_setting(key, value).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::converter::tests::FakeEncoder;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) async fn test_library(root: &Path, encoder: FakeEncoder) -> Library {
        let store = Store::open_in_memory().await.unwrap();
        let converter = Converter::new(Arc::new(encoder), EncoderConfig::default());
        Library::new(store, converter, root.to_path_buf())
    }

    fn write_file(dir: &Path, name: &str, size: usize) -> String {
        let path = dir.join(name);
        fs::write(&path, vec![0u8; size]).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_rescan_inserts_nothing_new() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..5 {
            write_file(temp_dir.path(), &format!("clip{}.mp4", i), (i + 1) * 100);
            write_file(temp_dir.path(), &format!("notes{}.txt", i), 10);
        }
        let library = test_library(temp_dir.path(), FakeEncoder::producing(10)).await;

        let first = library.scan(None).await.unwrap();
        let second = library.scan(None).await.unwrap();

        assert_eq!(first, ScanSummary { discovered: 5, inserted: 5 });
        assert_eq!(second, ScanSummary { discovered: 5, inserted: 0 });
        assert_eq!(library.store().count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_scan_explicit_directory() {
        let temp_dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        write_file(other.path(), "elsewhere.mkv", 10);
        let library = test_library(temp_dir.path(), FakeEncoder::producing(5)).await;

        let summary = library.scan(Some(other.path())).await.unwrap();

        assert_eq!(summary.inserted, 1);
    }

    #[tokio::test]
    async fn test_rescan_keeps_existing_state() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_file(temp_dir.path(), "clip.mkv", 100);
        let library = test_library(temp_dir.path(), FakeEncoder::producing(10)).await;
        library.scan(None).await.unwrap();

        let mut record = library.store().get_by_path(&path).await.unwrap().unwrap();
        record.processed = true;
        library.store().upsert(&record).await.unwrap();
        library.scan(None).await.unwrap();

        let stored = library.store().get_by_path(&path).await.unwrap().unwrap();
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn test_process_single_unknown_path() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(temp_dir.path(), FakeEncoder::producing(10)).await;

        let result = library.process_single("/not/tracked.mp4").await;

        assert!(matches!(result, Err(LibraryError::NotFound(_))));
        assert_eq!(library.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_process_single_leaves_deleted_record_alone() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_file(temp_dir.path(), "clip.mkv", 100);
        let library = test_library(temp_dir.path(), FakeEncoder::producing(50)).await;
        library.scan(None).await.unwrap();
        let mut record = library.store().get_by_path(&path).await.unwrap().unwrap();
        record.processed = true;
        record.converted = true;
        record.deleted = true;
        library.store().upsert(&record).await.unwrap();
        fs::remove_file(&path).unwrap();

        let returned = library.process_single(&path).await.unwrap();

        assert_eq!(returned, record);
        let stored = library.store().get_by_path(&path).await.unwrap().unwrap();
        assert_eq!(stored, record);
        assert!(!temp_dir.path().join("clip.temp.mkv").exists());
    }

    #[tokio::test]
    async fn test_concurrent_scans_insert_each_file_once() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..5 {
            write_file(temp_dir.path(), &format!("clip{}.mkv", i), 10);
        }
        let library = test_library(temp_dir.path(), FakeEncoder::producing(1)).await;

        let (a, b) = tokio::join!(library.scan(None), library.scan(None));

        let inserted = a.unwrap().inserted + b.unwrap().inserted;
        assert_eq!(inserted, 5);
        assert_eq!(library.store().count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_process_single_rewrites_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_file(temp_dir.path(), "clip.mp4", 100);
        let library = test_library(temp_dir.path(), FakeEncoder::producing(50)).await;
        library.scan(None).await.unwrap();

        let record = library.process_single(&path).await.unwrap();

        assert!(record.converted && record.processed);
        assert!(record.path.ends_with("clip.mkv"));
        assert_eq!(record.initial_size, 100);
        assert_eq!(record.current_size, 50);
        assert!(!Path::new(&path).exists());

        // The row moved to the new path rather than being duplicated
        let files = library.list_files().await.unwrap();
        assert_eq!(files, vec![record]);
        assert!(!library.store().exists_by_path(&path).await.unwrap());

        let stats = library.stats().await.unwrap();
        assert_eq!(stats.total_bytes_saved, 50);
        assert!((stats.percent_saved - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_process_all_summary() {
        let temp_dir = TempDir::new().unwrap();
        write_file(temp_dir.path(), "big.mp4", 100);
        write_file(temp_dir.path(), "small.mp4", 20);
        let library = test_library(temp_dir.path(), FakeEncoder::producing(50)).await;
        library.scan(None).await.unwrap();

        let summary = library.process_all().await.unwrap();

        assert_eq!(
            summary,
            ProcessSummary {
                attempted: 2,
                converted: 1,
                retained: 1,
                failed: 0,
            }
        );
        let pending = library.store().list_by(false, false).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].processed);
        assert!(pending[0].path.ends_with("small.mp4"));
    }

    #[tokio::test]
    async fn test_process_all_encoder_failure_is_retryable() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_file(temp_dir.path(), "clip.mp4", 100);
        let library = test_library(temp_dir.path(), FakeEncoder::failing()).await;
        library.scan(None).await.unwrap();

        let summary = library.process_all().await.unwrap();

        assert_eq!(summary.failed, 1);
        let stored = library.store().get_by_path(&path).await.unwrap().unwrap();
        assert!(!stored.processed && !stored.converted);
        assert_eq!(stored.current_size, 100);
    }

    #[tokio::test]
    async fn test_check_after_external_delete() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_file(temp_dir.path(), "clip.mkv", 100);
        let library = test_library(temp_dir.path(), FakeEncoder::producing(10)).await;
        library.scan(None).await.unwrap();
        fs::remove_file(&path).unwrap();

        let changed = library.check().await.unwrap();

        assert_eq!(changed.len(), 1);
        assert!(changed[0].deleted);
        assert!(library.store().list_by(false, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_passthrough() {
        let temp_dir = TempDir::new().unwrap();
        let library = test_library(temp_dir.path(), FakeEncoder::producing(10)).await;

        library.put_setting("theme", "dark").await.unwrap();
        library.put_setting("theme", "light").await.unwrap();

        let settings = library.settings().await.unwrap();
        assert_eq!(
            settings,
            vec![Setting {
                key: "theme".to_string(),
                value: "light".to_string(),
            }]
        );
    }
}
