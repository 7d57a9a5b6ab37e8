//! Replacer module for committing an encoded file in place of its original.
//!
//! The encoder writes into a temp file next to the original, so committing is
//! a single rename on the same filesystem. When the final name keeps the
//! original's extension the rename replaces the original atomically. When the
//! extension changes, the original is removed only after the rename, so an
//! interruption leaves both files on disk rather than neither.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Suffix of the marker written while a copy-based commit is in flight.
pub const COMMIT_MARKER_SUFFIX: &str = ".vidshrink-commit";

/// Suffix of the staging file a copy-based commit writes before its rename.
pub const STAGING_COPY_SUFFIX: &str = ".vidshrink-copy";

/// Errors that can occur while committing a replacement.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// Another file already occupies the final path.
    #[error("Refusing to overwrite existing file: {0}")]
    DestinationExists(PathBuf),

    /// Failed to write the commit marker.
    #[error("Failed to write commit marker: {0}")]
    MarkerFailed(std::io::Error),

    /// Failed to copy the encoded file to its final location.
    #[error("Failed to copy encoded file: {0}")]
    CopyFailed(std::io::Error),

    /// The copied file does not match the encoded file.
    #[error("Copied file has {actual} bytes, expected {expected}")]
    VerifyFailed { expected: u64, actual: u64 },
}

fn stem_of(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string())
}

/// Where the encoder writes: `<dir>/<stem>.<marker>.<container>`.
///
/// ```
/// use std::path::Path;
/// use vidshrink::replace::temp_output_path;
///
/// let temp = temp_output_path(Path::new("/media/film.mp4"), "temp", "mkv");
/// assert_eq!(temp, Path::new("/media/film.temp.mkv"));
/// ```
pub fn temp_output_path(input: &Path, marker: &str, container: &str) -> PathBuf {
    input.with_file_name(format!("{}.{}.{}", stem_of(input), marker, container))
}

/// Committed name of the replacement: `<dir>/<stem>.<container>`.
pub fn final_output_path(input: &Path, container: &str) -> PathBuf {
    input.with_file_name(format!("{}.{}", stem_of(input), container))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Marker path for a copy-based commit into `final_path`.
pub fn commit_marker_path(final_path: &Path) -> PathBuf {
    with_suffix(final_path, COMMIT_MARKER_SUFFIX)
}

/// Staging file a copy-based commit fills before renaming it to `final_path`.
pub fn staging_copy_path(final_path: &Path) -> PathBuf {
    with_suffix(final_path, STAGING_COPY_SUFFIX)
}

/// Replace `original` with the encoded `temp_output`, ending at `final_path`.
///
/// Steps:
/// 1. Refuse if `final_path` is some other existing file
/// 2. Rename `temp_output` to `final_path` (atomic on one filesystem)
/// 3. If the rename fails, copy with a durable marker instead
/// 4. Remove `original` when it is not `final_path`
///
/// On error the original is untouched and `temp_output` is left for the
/// caller to discard.
pub fn commit_replacement(
    original: &Path,
    temp_output: &Path,
    final_path: &Path,
) -> Result<(), ReplaceError> {
    let replaces_in_place = final_path == original;

    if !replaces_in_place && final_path.exists() {
        return Err(ReplaceError::DestinationExists(final_path.to_path_buf()));
    }

    if let Err(e) = fs::rename(temp_output, final_path) {
        debug!(
            "Rename {} -> {} failed ({}), falling back to copy",
            temp_output.display(),
            final_path.display(),
            e
        );
        copy_with_marker(temp_output, final_path)?;
    }

    if !replaces_in_place {
        // The replacement is committed; a leftover original is only clutter
        if let Err(e) = fs::remove_file(original) {
            warn!("Failed to remove original {}: {}", original.display(), e);
        }
    }

    Ok(())
}

/// Copy-verify-rename, bracketed by a marker that names both files.
///
/// The copy goes to a staging file beside `final_path` and only a verified
/// copy is renamed into place, so `final_path` (which may be the original)
/// is never left half-written. While the marker exists the temp output is
/// still complete, so an interrupted commit can be recovered by hand.
fn copy_with_marker(temp_output: &Path, final_path: &Path) -> Result<(), ReplaceError> {
    let marker = commit_marker_path(final_path);
    write_marker(&marker, temp_output, final_path).map_err(ReplaceError::MarkerFailed)?;

    let staging = staging_copy_path(final_path);
    let result = stage_copy(temp_output, &staging)
        .and_then(|()| fs::rename(&staging, final_path).map_err(ReplaceError::CopyFailed));

    match &result {
        Ok(()) => remove_logged(temp_output, "temp output"),
        Err(_) => remove_logged(&staging, "staging copy"),
    }
    remove_logged(&marker, "commit marker");
    result
}

/// Copy `source` to `staging`, flush it and check the length.
fn stage_copy(source: &Path, staging: &Path) -> Result<(), ReplaceError> {
    let expected = fs::metadata(source)
        .map_err(ReplaceError::CopyFailed)?
        .len();
    fs::copy(source, staging).map_err(ReplaceError::CopyFailed)?;

    let copied = OpenOptions::new()
        .write(true)
        .open(staging)
        .map_err(ReplaceError::CopyFailed)?;
    copied.sync_all().map_err(ReplaceError::CopyFailed)?;
    let actual = copied.metadata().map_err(ReplaceError::CopyFailed)?.len();
    if actual != expected {
        return Err(ReplaceError::VerifyFailed { expected, actual });
    }
    Ok(())
}

fn remove_logged(path: &Path, what: &str) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {} {}: {}", what, path.display(), e),
    }
}

fn write_marker(marker: &Path, temp_output: &Path, final_path: &Path) -> std::io::Result<()> {
    let mut file = File::create(marker)?;
    writeln!(file, "source={}", temp_output.display())?;
    writeln!(file, "target={}", final_path.display())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &[u8]) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_temp_and_final_paths() {
        let input = Path::new("/media/movies/film.2024.mp4");
        assert_eq!(
            temp_output_path(input, "temp", "mkv"),
            PathBuf::from("/media/movies/film.2024.temp.mkv")
        );
        assert_eq!(
            final_output_path(input, "mkv"),
            PathBuf::from("/media/movies/film.2024.mkv")
        );
    }

    #[test]
    fn test_final_path_of_mkv_input_is_input() {
        let input = Path::new("/media/film.mkv");
        assert_eq!(final_output_path(input, "mkv"), input);
    }

    #[test]
    fn test_commit_marker_path() {
        assert_eq!(
            commit_marker_path(Path::new("/media/film.mkv")),
            PathBuf::from("/media/film.mkv.vidshrink-commit")
        );
    }

    #[test]
    fn test_commit_with_new_extension() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("film.mp4");
        let temp = temp_dir.path().join("film.temp.mkv");
        let final_path = temp_dir.path().join("film.mkv");
        write(&original, b"original content");
        write(&temp, b"encoded");

        commit_replacement(&original, &temp, &final_path).unwrap();

        assert!(!original.exists());
        assert!(!temp.exists());
        assert_eq!(fs::read(&final_path).unwrap(), b"encoded");
    }

    #[test]
    fn test_commit_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("film.mkv");
        let temp = temp_dir.path().join("film.temp.mkv");
        write(&original, b"original content");
        write(&temp, b"encoded");

        commit_replacement(&original, &temp, &original).unwrap();

        assert!(!temp.exists());
        assert_eq!(fs::read(&original).unwrap(), b"encoded");
    }

    #[test]
    fn test_commit_refuses_to_clobber_other_file() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("film.mp4");
        let temp = temp_dir.path().join("film.temp.mkv");
        let final_path = temp_dir.path().join("film.mkv");
        write(&original, b"original content");
        write(&temp, b"encoded");
        write(&final_path, b"someone else's file");

        let result = commit_replacement(&original, &temp, &final_path);

        assert!(matches!(result, Err(ReplaceError::DestinationExists(_))));
        assert_eq!(fs::read(&original).unwrap(), b"original content");
        assert_eq!(fs::read(&final_path).unwrap(), b"someone else's file");
        assert!(temp.exists());
    }

    #[test]
    fn test_copy_with_marker_removes_temp_and_marker() {
        let temp_dir = TempDir::new().unwrap();
        let temp = temp_dir.path().join("film.temp.mkv");
        let final_path = temp_dir.path().join("film.mkv");
        write(&temp, b"encoded bytes");

        copy_with_marker(&temp, &final_path).unwrap();

        assert_eq!(fs::read(&final_path).unwrap(), b"encoded bytes");
        assert!(!temp.exists());
        assert!(!commit_marker_path(&final_path).exists());
        assert!(!staging_copy_path(&final_path).exists());
    }

    #[test]
    fn test_copy_over_original_replaces_it_whole() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("film.mkv");
        let temp = temp_dir.path().join("film.temp.mkv");
        write(&original, b"original content");
        write(&temp, b"encoded");

        copy_with_marker(&temp, &original).unwrap();

        assert_eq!(fs::read(&original).unwrap(), b"encoded");
        assert!(!staging_copy_path(&original).exists());
    }

    #[test]
    fn test_failed_copy_leaves_destination_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let temp = temp_dir.path().join("missing.temp.mkv");
        let original = temp_dir.path().join("film.mkv");
        write(&original, b"original content");

        let result = copy_with_marker(&temp, &original);

        assert!(matches!(result, Err(ReplaceError::CopyFailed(_))));
        assert_eq!(fs::read(&original).unwrap(), b"original content");
        assert!(!staging_copy_path(&original).exists());
        assert!(!commit_marker_path(&original).exists());
    }

    #[test]
    fn test_failed_copy_to_new_name_leaves_no_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let temp = temp_dir.path().join("missing.temp.mkv");
        let final_path = temp_dir.path().join("film.mkv");

        let result = copy_with_marker(&temp, &final_path);

        assert!(result.is_err());
        assert!(!final_path.exists());
        assert!(!staging_copy_path(&final_path).exists());
    }

    #[test]
    fn test_staging_copy_path() {
        assert_eq!(
            staging_copy_path(Path::new("/media/film.mkv")),
            PathBuf::from("/media/film.mkv.vidshrink-copy")
        );
    }
}
