//! # In-use Registry
//!
//! Tracks cache files that live consumers are currently holding on to. The
//! registry only records *paths* being watched; it never owns the watching
//! object. When the cache needs to dispose of a watched file it moves the file
//! to a scratch directory instead of deleting it, and every watcher of that
//! path observes the new location through its [`FileWatch`].

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::utils::{move_file, remove_if_exists, unique_path_in};

/// Outcome of disposing of a cache file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposal {
    /// Nobody was watching the file; it was deleted
    Removed,
    /// The file was in use and now lives at this path
    Relocated(PathBuf),
}

struct Watcher {
    path: PathBuf,
    relocated: bool,
    tx: watch::Sender<PathBuf>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    watchers: HashMap<u64, Watcher>,
}

/// Shared registry of watched file paths
#[derive(Clone, Default)]
pub struct InUseRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl InUseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `path`. The returned guard keeps the file protected from
    /// deletion until it is dropped.
    pub fn watch(&self, path: impl Into<PathBuf>) -> FileWatch {
        let path = path.into();
        let (tx, rx) = watch::channel(path.clone());

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.watchers.insert(
            id,
            Watcher {
                path,
                relocated: false,
                tx,
            },
        );

        FileWatch {
            id,
            registry: Arc::downgrade(&self.state),
            rx,
        }
    }

    /// Whether any live watcher references `path`
    pub fn is_in_use(&self, path: &Path) -> bool {
        self.state.lock().watchers.values().any(|w| w.path == path)
    }

    /// Number of live watchers across all paths
    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }

    /// Point every watcher of `from` at `to`; returns how many were notified.
    fn mark_relocated(&self, from: &Path, to: &Path) -> usize {
        let mut state = self.state.lock();
        let mut notified = 0;
        for watcher in state.watchers.values_mut().filter(|w| w.path == from) {
            watcher.path = to.to_path_buf();
            watcher.relocated = true;
            watcher.tx.send_replace(to.to_path_buf());
            notified += 1;
        }
        notified
    }

    /// Delete `path`, or move it into `scratch_dir` if it is being watched.
    pub async fn dispose(&self, path: &Path, scratch_dir: &Path) -> io::Result<Disposal> {
        if !self.is_in_use(path) {
            remove_if_exists(path).await?;
            return Ok(Disposal::Removed);
        }

        tokio::fs::create_dir_all(scratch_dir).await?;
        let destination = unique_path_in(scratch_dir, path.file_name()).await?;
        move_file(path, &destination).await?;

        let notified = self.mark_relocated(path, &destination);
        if notified == 0 {
            // every watcher went away while the file was being moved
            remove_if_exists(&destination).await?;
            return Ok(Disposal::Removed);
        }

        debug!(
            from = ?path,
            to = ?destination,
            watchers = notified,
            "Relocated in-use cache file"
        );
        Ok(Disposal::Relocated(destination))
    }
}

/// A consumer's non-owning claim on a file path.
///
/// Dropping the watch releases the claim. If the file had been relocated out
/// of the cache and this was its last watcher, the scratch copy is removed,
/// on the blocking pool when a tokio runtime is available.
pub struct FileWatch {
    id: u64,
    registry: Weak<Mutex<RegistryState>>,
    rx: watch::Receiver<PathBuf>,
}

impl FileWatch {
    /// Current location of the watched file
    pub fn path(&self) -> PathBuf {
        self.rx.borrow().clone()
    }

    /// Whether the file moved since the last call to [`FileWatch::relocated`]
    pub fn has_moved(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next relocation. Returns `None` once the registry is gone.
    pub async fn relocated(&mut self) -> Option<PathBuf> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl std::fmt::Debug for FileWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatch")
            .field("id", &self.id)
            .field("path", &*self.rx.borrow())
            .finish()
    }
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        let Some(state) = self.registry.upgrade() else {
            return;
        };
        let mut state = state.lock();
        let Some(watcher) = state.watchers.remove(&self.id) else {
            return;
        };
        let still_watched = state.watchers.values().any(|w| w.path == watcher.path);
        drop(state);

        if watcher.relocated && !still_watched {
            let path = watcher.path;
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn_blocking(move || remove_released(&path));
                }
                Err(_) => remove_released(&path),
            }
        }
    }
}

fn remove_released(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(path = ?path, error = %e, "Failed to remove released scratch file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::wait_for_removal;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_dispose_unwatched_file_deletes_it() {
        let dir = tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let file = dir.path().join("data");
        std::fs::write(&file, b"bytes").unwrap();

        let registry = InUseRegistry::new();
        let disposal = registry.dispose(&file, &scratch).await.unwrap();

        assert_eq!(disposal, Disposal::Removed);
        assert!(!file.exists());
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_dispose_watched_file_relocates_and_notifies() {
        let dir = tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let file = dir.path().join("data");
        std::fs::write(&file, b"bytes").unwrap();

        let registry = InUseRegistry::new();
        let mut first = registry.watch(&file);
        let second = registry.watch(&file);
        assert!(registry.is_in_use(&file));

        let new_path = match registry.dispose(&file, &scratch).await.unwrap() {
            Disposal::Relocated(path) => path,
            other => panic!("expected relocation, got {other:?}"),
        };

        assert!(!file.exists());
        assert_eq!(std::fs::read(&new_path).unwrap(), b"bytes");
        assert!(new_path.starts_with(&scratch));
        assert!(first.has_moved());
        assert_eq!(first.relocated().await, Some(new_path.clone()));
        assert_eq!(second.path(), new_path);
        assert!(!registry.is_in_use(&file));
        assert!(registry.is_in_use(&new_path));
    }

    #[tokio::test]
    async fn test_last_watcher_release_removes_scratch_copy() {
        let dir = tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let file = dir.path().join("data");
        std::fs::write(&file, b"bytes").unwrap();

        let registry = InUseRegistry::new();
        let first = registry.watch(&file);
        let second = registry.watch(&file);
        registry.dispose(&file, &scratch).await.unwrap();
        let relocated = first.path();

        drop(first);
        assert!(relocated.exists(), "still watched by the second guard");
        drop(second);
        assert_eq!(registry.watcher_count(), 0);
        wait_for_removal(&relocated).await;
    }

    #[test]
    fn test_release_outside_runtime_removes_inline() {
        let dir = tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        let file = scratch.join("data");
        std::fs::write(&file, b"bytes").unwrap();

        let registry = InUseRegistry::new();
        let watch = registry.watch(&file);
        registry.mark_relocated(&file, &file);

        drop(watch);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_dropping_unrelocated_watch_keeps_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("data");
        std::fs::write(&file, b"bytes").unwrap();

        let registry = InUseRegistry::new();
        drop(registry.watch(&file));

        assert!(file.exists());
        assert!(!registry.is_in_use(&file));
    }
}
