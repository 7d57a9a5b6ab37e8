//! Reconciliation of stored records against the filesystem.
//!
//! Runs only when asked; there is no watcher.

use crate::record::FileRecord;
use crate::store::{Store, StoreError};
use std::fs;
use std::io::ErrorKind;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type for reconciliation runs
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The blocking stat pass panicked or was cancelled
    #[error("Reconciliation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What reconciliation did to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// File matches the stored sizes, or could not be examined
    Unchanged,
    /// File is gone; the record is now soft-deleted
    Deleted,
    /// File changed size; sizes refreshed and flags cleared
    Resized { size: u64 },
}

impl Change {
    pub fn is_changed(&self) -> bool {
        !matches!(self, Change::Unchanged)
    }
}

/// Compare one record with the file at its path and update it in memory.
///
/// Deleted records are never examined again. A stat error other than
/// not-found leaves the record untouched.
pub fn reconcile_record(record: &mut FileRecord) -> Change {
    if record.deleted {
        return Change::Unchanged;
    }

    let size = match fs::metadata(&record.path) {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("File disappeared: {}", record.path);
            record.deleted = true;
            return Change::Deleted;
        }
        Err(e) => {
            warn!("Cannot stat {}: {}", record.path, e);
            return Change::Unchanged;
        }
    };

    let stored_initial = u64::try_from(record.initial_size).ok();
    let stored_current = u64::try_from(record.current_size).ok();
    if stored_initial == Some(size) && stored_current == Some(size) {
        return Change::Unchanged;
    }

    debug!(
        "File size changed: {} ({} -> {} bytes)",
        record.path, record.current_size, size
    );
    record.reset_sizes(size);
    record.converted = false;
    record.processed = false;
    Change::Resized { size }
}

/// Reconcile a batch in memory, returning only the records that changed.
///
/// Stats every file; run it off the async runtime.
pub fn reconcile_all(records: Vec<FileRecord>) -> Vec<FileRecord> {
    records
        .into_iter()
        .filter(|r| !r.deleted)
        .filter_map(|mut record| reconcile_record(&mut record).is_changed().then_some(record))
        .collect()
}

/// Reconcile every non-deleted record and persist the changed ones.
///
/// Returns the changed records in their updated state.
pub async fn check(store: &Store) -> Result<Vec<FileRecord>, ReconcileError> {
    let records = store.list_all().await?;
    let changed = tokio::task::spawn_blocking(move || reconcile_all(records)).await?;

    for record in &changed {
        store.upsert(record).await?;
    }

    info!("Reconciliation changed {} records", changed.len());
    Ok(changed)
}
