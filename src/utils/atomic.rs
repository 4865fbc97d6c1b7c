//! Atomic file write operations.
//!
//! Content goes to a temp file in the target's directory which is then
//! renamed over the target, so readers see either the old or the new file.
//! Temp files are cleaned up automatically on failure.

use std::fs::Permissions;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `content` to `path` atomically, leaving the file with `mode`.
///
/// The temp file is created owner-only, so the content is never visible
/// with looser permissions than `mode`.
///
/// # Errors
///
/// Returns an `io::Error` if the parent directory cannot be determined, the
/// temp file cannot be created or written, or the rename fails.
pub fn atomic_write_sync(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path has no parent directory"))?;

    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file
        .as_file()
        .set_permissions(Permissions::from_mode(mode))?;

    // Consumes the NamedTempFile, preventing auto-deletion
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Async wrapper around [`atomic_write_sync`].
pub async fn atomic_write(path: &Path, content: &str, mode: u32) -> io::Result<()> {
    let target_path = path.to_path_buf();
    let content_owned = content.to_string();

    tokio::task::spawn_blocking(move || {
        atomic_write_sync(&target_path, content_owned.as_bytes(), mode)
    })
    .await
    .map_err(io::Error::other)?
}
