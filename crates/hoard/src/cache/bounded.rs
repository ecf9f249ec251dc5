//! # Bounded Cache
//!
//! Admission control on top of [`CacheIndex`]. All mutating operations
//! (admit, evict, clear, limit changes) run under one async mutex so their
//! effects never interleave. Lookups read the in-memory index directly and do
//! not wait for pending mutations. Callers that keep using a file take it
//! through [`BoundedCache::lookup_watched`] or [`BoundedCache::admit_watched`],
//! which claim it before any other mutation can dispose of it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::in_use::{FileWatch, InUseRegistry};
use super::index::CacheIndex;
use super::types::{CacheConfig, CacheEntry, CacheError, CacheLimit, CacheResult};
use super::utils::{move_file, unique_path_in};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    size: CacheLimit,
    count: CacheLimit,
}

struct Inner {
    index: CacheIndex,
    limits: Mutex<Limits>,
    in_use: InUseRegistry,
}

/// Size- and count-bounded file cache
#[derive(Clone)]
pub struct BoundedCache {
    inner: Arc<Inner>,
}

impl BoundedCache {
    /// Open (or create) the cache described by `config`.
    ///
    /// The index is rebuilt from disk, then the configured limits are enforced
    /// against whatever survived the restart.
    pub async fn open(config: &CacheConfig, in_use: InUseRegistry) -> CacheResult<Self> {
        let index = CacheIndex::open(
            config.resolved_cache_dir(),
            config.resolved_scratch_dir(),
            in_use.clone(),
        )
        .await?;

        let cache = Self {
            inner: Arc::new(Inner {
                index,
                limits: Mutex::new(Limits {
                    size: config.size_limit,
                    count: config.count_limit,
                }),
                in_use,
            }),
        };

        {
            let limits = cache.inner.limits.lock().await;
            cache.enforce_size_locked(limits.size).await;
            cache.enforce_count_locked(limits.count).await;
        }

        info!(
            dir = ?cache.root(),
            entries = cache.len(),
            size_limit = %config.size_limit,
            count_limit = %config.count_limit,
            "Cache opened"
        );
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        self.inner.index.root()
    }

    /// Registry consulted before deleting cache files
    pub fn in_use(&self) -> &InUseRegistry {
        &self.inner.in_use
    }

    /// Path of the cached file for `key`, if present on disk
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        self.inner.index.lookup(key)
    }

    /// Like [`BoundedCache::lookup`], but claims the file in the in-use registry
    pub fn lookup_watched(&self, key: &str) -> Option<FileWatch> {
        self.inner.index.lookup_watched(key)
    }

    /// Like [`BoundedCache::lookup`], but waits for in-flight mutations first
    pub async fn lookup_serialized(&self, key: &str) -> Option<PathBuf> {
        let _limits = self.inner.limits.lock().await;
        self.inner.index.lookup(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.index.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.inner.index.total_size()
    }

    /// Snapshot of all entries, oldest first
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.inner.index.entries_by_age_ascending()
    }

    pub async fn size_limit(&self) -> CacheLimit {
        self.inner.limits.lock().await.size
    }

    pub async fn count_limit(&self) -> CacheLimit {
        self.inner.limits.lock().await.count
    }

    /// Accept `source` as the content for `key`, returning its new location.
    ///
    /// Oldest entries are evicted as needed to honour the limits. When the
    /// limits cannot be met nothing is evicted and `source` is left in place.
    pub async fn admit(&self, source: &Path, key: &str) -> CacheResult<PathBuf> {
        let limits = self.inner.limits.lock().await;
        self.admit_locked(*limits, source, key).await
    }

    /// Like [`BoundedCache::admit`], but the admitted file is claimed in the
    /// in-use registry before the admission lock is released.
    pub async fn admit_watched(&self, source: &Path, key: &str) -> CacheResult<FileWatch> {
        let limits = self.inner.limits.lock().await;
        let path = self.admit_locked(*limits, source, key).await?;
        Ok(self.inner.in_use.watch(path))
    }

    async fn admit_locked(&self, limits: Limits, source: &Path, key: &str) -> CacheResult<PathBuf> {

        let size = fs::metadata(source)
            .await
            .map_err(|e| CacheError::io(source, e))?
            .len();

        if let CacheLimit::LimitedTo(max) = limits.size {
            if size > max {
                return Err(CacheError::EntryTooLarge { size, limit: max });
            }
        }
        if limits.count == CacheLimit::LimitedTo(0) {
            return Err(CacheError::AdmissionFailed);
        }

        let victims = plan_evictions(
            &self.inner.index.entries_by_age_ascending(),
            key,
            size,
            limits.size,
            limits.count,
        )?;
        for victim in &victims {
            debug!(key = %victim.key, size = victim.size, "Evicting to make room");
            self.inner.index.remove(&victim.key).await;
        }

        let destination = unique_path_in(self.root(), None)
            .await
            .map_err(|e| CacheError::io(self.root(), e))?;
        move_file(source, &destination)
            .await
            .map_err(|e| CacheError::io(source, e))?;

        let file_name = destination
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                CacheError::io(
                    &destination,
                    std::io::Error::other("generated cache file name is not UTF-8"),
                )
            })?;
        self.inner.index.insert(key, file_name, size).await;

        info!(key = %key, size, evicted = victims.len(), "Admitted file into cache");
        Ok(destination)
    }

    /// Remove one entry. Files still in use are relocated rather than deleted.
    pub async fn evict(&self, key: &str) -> Option<CacheEntry> {
        let _limits = self.inner.limits.lock().await;
        self.inner.index.remove(key).await
    }

    /// Remove the entry for `key` only while it still points at `path`.
    ///
    /// Used to take back an admission without touching a newer entry that
    /// replaced it.
    pub async fn evict_file(&self, key: &str, path: &Path) -> Option<CacheEntry> {
        let _limits = self.inner.limits.lock().await;
        let entry = self.inner.index.get(key)?;
        if entry.path_in(self.root()) != path {
            return None;
        }
        self.inner.index.remove(key).await
    }

    /// Dispose of every cached file and wipe the index
    pub async fn clear(&self) {
        let _limits = self.inner.limits.lock().await;
        self.clear_locked().await;
    }

    /// Change the byte ceiling and evict down to it immediately
    pub async fn set_size_limit(&self, limit: CacheLimit) {
        let mut limits = self.inner.limits.lock().await;
        limits.size = limit;
        self.enforce_size_locked(limit).await;
    }

    /// Change the entry-count ceiling and evict down to it immediately
    pub async fn set_count_limit(&self, limit: CacheLimit) {
        let mut limits = self.inner.limits.lock().await;
        limits.count = limit;
        self.enforce_count_locked(limit).await;
    }

    /// Block every mutation until the guard is dropped
    #[cfg(test)]
    pub(crate) async fn hold_mutations(&self) -> tokio::sync::MutexGuard<'_, Limits> {
        self.inner.limits.lock().await
    }

    async fn clear_locked(&self) {
        let removed = self.inner.index.clear().await;
        info!(entries = removed, "Cache cleared");
    }

    async fn enforce_size_locked(&self, limit: CacheLimit) {
        let CacheLimit::LimitedTo(max) = limit else {
            return;
        };
        if max == 0 {
            self.clear_locked().await;
            return;
        }

        let mut used = self.inner.index.total_size();
        for entry in self.inner.index.entries_by_age_ascending() {
            if used <= max {
                break;
            }
            used = used.saturating_sub(entry.size);
            self.inner.index.remove(&entry.key).await;
        }

        if used > max {
            warn!(used, limit = max, "Size limit unreachable by eviction, clearing cache");
            self.clear_locked().await;
        }
    }

    async fn enforce_count_locked(&self, limit: CacheLimit) {
        let CacheLimit::LimitedTo(max) = limit else {
            return;
        };
        if max == 0 {
            self.clear_locked().await;
            return;
        }

        let entries = self.inner.index.entries_by_age_ascending();
        let excess = (entries.len() as u64).saturating_sub(max) as usize;
        for entry in entries.iter().take(excess) {
            self.inner.index.remove(&entry.key).await;
        }
    }
}

/// Choose the entries to evict so that an incoming file of `size` bytes for
/// `key` fits both limits. `entries` must be ordered oldest first.
///
/// An existing entry for `key` is about to be replaced, so it neither counts
/// toward the totals nor becomes a victim.
fn plan_evictions(
    entries: &[CacheEntry],
    key: &str,
    size: u64,
    size_limit: CacheLimit,
    count_limit: CacheLimit,
) -> CacheResult<Vec<CacheEntry>> {
    let candidates: Vec<&CacheEntry> = entries.iter().filter(|e| e.key != key).collect();
    let mut used: u64 = candidates.iter().map(|e| e.size).sum();
    let mut remaining = candidates.len() as u64;
    let mut victims = Vec::new();
    let mut oldest = candidates.into_iter();

    while size_limit.is_exceeded_by(used + size) {
        let Some(victim) = oldest.next() else {
            return Err(CacheError::AdmissionFailed);
        };
        used -= victim.size;
        remaining -= 1;
        victims.push(victim.clone());
    }

    // the incoming file takes one slot
    while count_limit.is_exceeded_by(remaining + 1) {
        let Some(victim) = oldest.next() else {
            return Err(CacheError::AdmissionFailed);
        };
        remaining -= 1;
        victims.push(victim.clone());
    }

    Ok(victims)
}
