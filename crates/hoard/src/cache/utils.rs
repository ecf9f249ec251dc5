//! # Cache Utilities
//!
//! Common filesystem helpers for cache operations.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;
use uuid::Uuid;

/// Pick a path inside `dir` that does not exist yet.
///
/// The preferred name is tried first; on collision (or when no name is given)
/// fresh UUIDs are generated until a free one is found.
pub(crate) async fn unique_path_in(dir: &Path, preferred: Option<&OsStr>) -> io::Result<PathBuf> {
    let mut candidate = match preferred {
        Some(name) => dir.join(name),
        None => dir.join(Uuid::new_v4().to_string()),
    };
    while fs::try_exists(&candidate).await? {
        candidate = dir.join(Uuid::new_v4().to_string());
    }
    Ok(candidate)
}

/// Move a file, falling back to copy + remove when `from` and `to` are on
/// different filesystems. On failure `from` is left in place and no partial
/// copy remains at `to`.
pub(crate) async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            if let Err(copy_err) = fs::copy(from, to).await {
                let _ = fs::remove_file(to).await;
                return Err(copy_err);
            }
            if let Err(e) = fs::remove_file(from).await {
                warn!(path = ?from, error = %e, "Failed to remove source after cross-device copy");
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Remove a file, treating "already gone" as success.
pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
