//! Metadata record for a tracked video file.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Derive the stable record identifier for a path.
///
/// Lowercase hex SHA-256 of the path string. Depends on the path only, never
/// on file contents, so re-discovering the same path always yields the same id.
pub fn file_id(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Base name of a path, falling back to the whole string.
fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

/// One tracked file and its conversion state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    /// Hash of `path`, see [`file_id`]
    pub id: String,
    /// Base name of the file
    pub name: String,
    /// Filesystem path
    pub path: String,
    /// Size in bytes at first discovery
    pub initial_size: i64,
    /// Size in bytes after the latest reconciliation or conversion
    pub current_size: i64,
    /// Path observed missing from disk
    pub deleted: bool,
    /// A smaller replacement has been committed
    pub converted: bool,
    /// An encode attempt reached a terminal decision
    pub processed: bool,
}

impl FileRecord {
    /// Create a freshly discovered record; both sizes start at `size`.
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let size = clamp_size(size);
        Self {
            id: file_id(&path),
            name: base_name(&path),
            path,
            initial_size: size,
            current_size: size,
            deleted: false,
            converted: false,
            processed: false,
        }
    }

    /// Point the record at a new path, recomputing `id` and `name`.
    pub fn set_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.id = file_id(&path);
        self.name = base_name(&path);
        self.path = path;
    }

    /// Both size fields set to `size`.
    pub fn reset_sizes(&mut self, size: u64) {
        let size = clamp_size(size);
        self.initial_size = size;
        self.current_size = size;
    }

    /// Bytes saved by conversion so far (may be negative after external growth).
    pub fn bytes_saved(&self) -> i64 {
        self.initial_size - self.current_size
    }

    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

/// SQLite integers are signed; sizes beyond i64::MAX saturate.
pub(crate) fn clamp_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

impl std::fmt::Display for FileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} -> {} bytes, deleted={}, converted={}, processed={})",
            self.path,
            self.initial_size,
            self.current_size,
            self.deleted,
            self.converted,
            self.processed
        )
    }
}
