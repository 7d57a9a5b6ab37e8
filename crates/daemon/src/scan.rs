//! Scanner module for discovering video files under a directory tree.
//!
//! A file is a video when its extension maps to a `video/*` MIME type. File
//! contents are never inspected. The scanner reports every match; pairing the
//! results with the store's path lookup is what makes repeated scans
//! idempotent.

use crate::record::FileRecord;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Checks if a file's extension maps to a video MIME type.
pub fn is_video_file(path: &Path) -> bool {
    mime_guess::from_path(path)
        .iter()
        .any(|mime| mime.type_() == mime_guess::mime::VIDEO)
}

/// Scans `root` recursively and returns one record per video file.
///
/// This function:
/// - Follows no symlinks and descends into every subdirectory
/// - Skips non-video files silently
/// - Skips entries that vanish or cannot be stat'ed mid-walk
/// - Skips paths that are not valid UTF-8
/// - Returns an empty list when `root` does not exist
pub fn scan_directory(root: &Path) -> Vec<FileRecord> {
    if !root.exists() {
        warn!("Scan root does not exist: {}", root.display());
        return Vec::new();
    }

    info!("Scanning directory: {}", root.display());

    let candidates = WalkDir::new(root).into_iter().filter_map(|entry| match entry {
        Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
        Ok(_) => None,
        Err(e) => {
            debug!("Skipping unreadable entry: {}", e);
            None
        }
    });
    let records = records_for(candidates);

    info!("Found {} video files under {}", records.len(), root.display());
    records
}

/// Stat each listed path, keeping the video files that are still there.
fn records_for(paths: impl IntoIterator<Item = PathBuf>) -> Vec<FileRecord> {
    paths
        .into_iter()
        .filter_map(|path| record_for(&path))
        .collect()
}

/// Record for one listed file, or `None` when it should be skipped.
///
/// The file may disappear between listing and stat; that entry is dropped.
fn record_for(path: &Path) -> Option<FileRecord> {
    if !is_video_file(path) {
        return None;
    }

    let size_bytes = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            debug!("Skipping {} (stat failed: {})", path.display(), e);
            return None;
        }
    };

    let Some(path_str) = path.to_str() else {
        warn!("Skipping non UTF-8 path: {}", path.display());
        return None;
    };

    debug!("Found file: {} ({} bytes)", path_str, size_bytes);
    Some(FileRecord::new(path_str, size_bytes))
}
