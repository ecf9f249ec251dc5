//! # Cache Index
//!
//! Persisted mapping from resource key to cache file. The in-memory map is
//! authoritative while the process runs; every mutation rewrites the JSON
//! store in the cache root. On open, [`CacheIndex::rebuild_from_disk`]
//! reconciles the store with the files actually present so that a crash
//! between writing a data file and committing its record (or the reverse)
//! heals itself on the next start.
//!
//! Mutating methods must be serialized by the owner; [`BoundedCache`] does so
//! with its admission lock.
//!
//! [`BoundedCache`]: super::BoundedCache

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io;
use tracing::{debug, info, warn};

use super::in_use::{FileWatch, InUseRegistry};
use super::types::{CacheEntry, CacheError, CacheResult};

/// Name of the index store inside the cache root
pub const INDEX_FILE_NAME: &str = "index.json";
const INDEX_TMP_FILE_NAME: &str = "index.json.tmp";
const INDEX_VERSION: u32 = 1;

/// On-disk representation of the index store
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

pub struct CacheIndex {
    root: PathBuf,
    scratch_dir: PathBuf,
    in_use: InUseRegistry,
    entries: RwLock<HashMap<String, CacheEntry>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl CacheIndex {
    /// Open the index rooted at `root`, creating the directory if needed and
    /// reconciling the persisted store against the directory contents.
    pub async fn open(
        root: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        in_use: InUseRegistry,
    ) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| CacheError::io(&root, e))?;
        // paths handed to watchers must compare equal to the ones we dispose of
        let root = fs::canonicalize(&root).await.unwrap_or(root);

        let index = Self {
            root,
            scratch_dir: scratch_dir.into(),
            in_use,
            entries: RwLock::new(HashMap::new()),
            persist_lock: tokio::sync::Mutex::new(()),
        };
        index.rebuild_from_disk().await;
        Ok(index)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    /// Path of the cached file for `key`, only if the file still exists.
    /// A stale record is reported as a miss and left untouched.
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        let path = self.entries.read().get(key)?.path_in(&self.root);
        path.is_file().then_some(path)
    }

    /// Like [`CacheIndex::lookup`], but claims the file for the caller.
    ///
    /// The watch is registered while the record is still visible, so a
    /// concurrent removal relocates the file instead of deleting it.
    pub fn lookup_watched(&self, key: &str) -> Option<FileWatch> {
        let entries = self.entries.read();
        let path = entries.get(key)?.path_in(&self.root);
        path.is_file().then(|| self.in_use.watch(path))
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Sum of the recorded sizes of all entries
    pub fn total_size(&self) -> u64 {
        self.entries.read().values().map(|e| e.size).sum()
    }

    /// Snapshot of all entries, oldest first
    pub fn entries_by_age_ascending(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    /// Record `file_name` (already inside the cache root) as the data for `key`.
    ///
    /// If `key` already had an entry its old file is disposed of.
    pub async fn insert(&self, key: &str, file_name: String, size: u64) -> CacheEntry {
        let (entry, previous) = {
            let mut entries = self.entries.write();
            let entry = CacheEntry {
                key: key.to_string(),
                file_name,
                size,
                created_at: next_timestamp(&entries),
            };
            let previous = entries.insert(entry.key.clone(), entry.clone());
            (entry, previous)
        };
        if let Some(previous) = previous.filter(|p| p.file_name != entry.file_name) {
            self.discard(&previous).await;
        }

        self.persist_logged().await;
        debug!(key = %entry.key, file = %entry.file_name, size = entry.size, "Indexed cache entry");
        entry
    }

    /// Dispose of the file for `key` and drop its record. No-op if absent.
    pub async fn remove(&self, key: &str) -> Option<CacheEntry> {
        // records go before their files: a file is never disposed of while still reachable
        let entry = self.entries.write().remove(key)?;
        self.discard(&entry).await;
        self.persist_logged().await;
        debug!(key = %key, "Removed cache entry");
        Some(entry)
    }

    /// Dispose of every cached file, including files the index does not know
    /// about, and wipe the index.
    pub async fn clear(&self) -> usize {
        let entries: Vec<CacheEntry> = self.entries.write().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            self.discard(entry).await;
        }

        match self.list_data_files().await {
            Ok(strays) => {
                for name in strays {
                    self.discard_path(&self.root.join(name)).await;
                }
            }
            Err(e) => {
                warn!(dir = ?self.root, error = %e, "Failed to list cache directory while clearing");
            }
        }

        self.persist_logged().await;
        entries.len()
    }

    /// Reconcile the persisted store with the directory listing.
    ///
    /// Records without a data file are dropped and data files without a
    /// record are disposed of. Failures are logged; the index then starts
    /// from whatever could be recovered.
    pub async fn rebuild_from_disk(&self) {
        let persisted = match self.load_store().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Cache index unreadable, starting from an empty index");
                Vec::new()
            }
        };

        let files = match self.list_data_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = ?self.root, error = %e, "Failed to list cache directory, index may be incomplete");
                let mut entries = self.entries.write();
                for entry in persisted {
                    entries.entry(entry.key.clone()).or_insert(entry);
                }
                return;
            }
        };
        let present: HashSet<&str> = files.iter().filter_map(|n| n.to_str()).collect();

        let mut kept: HashMap<String, CacheEntry> = HashMap::new();
        let mut dropped_rows = 0usize;
        for entry in persisted {
            if present.contains(entry.file_name.as_str()) && !kept.contains_key(&entry.key) {
                kept.insert(entry.key.clone(), entry);
            } else {
                dropped_rows += 1;
            }
        }

        let referenced: HashSet<&str> = kept.values().map(|e| e.file_name.as_str()).collect();
        let orphans: Vec<PathBuf> = files
            .iter()
            .filter(|name| name.to_str().is_none_or(|n| !referenced.contains(n)))
            .map(|name| self.root.join(name))
            .collect();
        for orphan in &orphans {
            self.discard_path(orphan).await;
        }

        let entry_count = kept.len();
        *self.entries.write() = kept;
        self.persist_logged().await;

        info!(
            dir = ?self.root,
            entries = entry_count,
            dropped_rows,
            removed_files = orphans.len(),
            "Cache index synchronized with disk"
        );
    }

    async fn discard(&self, entry: &CacheEntry) {
        self.discard_path(&entry.path_in(&self.root)).await;
    }

    async fn discard_path(&self, path: &Path) {
        if let Err(e) = self.in_use.dispose(path, &self.scratch_dir).await {
            warn!(path = ?path, error = %e, "Failed to dispose of cache file");
        }
    }

    /// Names of all data files in the cache root (the index store excluded)
    async fn list_data_files(&self) -> io::Result<Vec<OsString>> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if name == INDEX_FILE_NAME || name == INDEX_TMP_FILE_NAME {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }

    async fn load_store(&self) -> CacheResult<Vec<CacheEntry>> {
        let path = self.store_path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Persistence(format!("{}: {e}", path.display()))),
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        let file: IndexFile = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::Persistence(format!("{}: {e}", path.display())))?;
        if file.version != INDEX_VERSION {
            return Err(CacheError::Persistence(format!(
                "unsupported index version {}",
                file.version
            )));
        }
        Ok(file.entries)
    }

    async fn persist(&self) -> CacheResult<()> {
        let _guard = self.persist_lock.lock().await;

        // snapshot under the persist lock so the last writer always stores the latest state
        let file = IndexFile {
            version: INDEX_VERSION,
            entries: self.entries_by_age_ascending(),
        };
        let json =
            serde_json::to_vec_pretty(&file).map_err(|e| CacheError::Persistence(e.to_string()))?;

        let tmp_path = self.root.join(INDEX_TMP_FILE_NAME);
        let store_path = self.store_path();
        fs::write(&tmp_path, &json)
            .await
            .map_err(|e| CacheError::Persistence(format!("{}: {e}", tmp_path.display())))?;
        if let Err(e) = fs::rename(&tmp_path, &store_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CacheError::Persistence(format!(
                "{}: {e}",
                store_path.display()
            )));
        }
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Failed to persist cache index, continuing with in-memory state");
        }
    }
}

/// Admission stamp strictly newer than every existing entry
fn next_timestamp(entries: &HashMap<String, CacheEntry>) -> DateTime<Utc> {
    let now = Utc::now();
    match entries.values().map(|e| e.created_at).max() {
        Some(newest) if now <= newest => newest + TimeDelta::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        scratch: PathBuf,
        in_use: InUseRegistry,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().join("cache");
        let scratch = dir.path().join("scratch");
        Fixture {
            _dir: dir,
            root,
            scratch,
            in_use: InUseRegistry::new(),
        }
    }

    async fn open(f: &Fixture) -> CacheIndex {
        CacheIndex::open(&f.root, &f.scratch, f.in_use.clone())
            .await
            .unwrap()
    }

    fn write_data(index: &CacheIndex, name: &str, len: usize) {
        std::fs::write(index.root().join(name), vec![7u8; len]).unwrap();
    }

    #[tokio::test]
    async fn test_open_creates_root_and_starts_empty() {
        let f = fixture();
        let index = open(&f).await;
        assert!(f.root.is_dir());
        assert!(index.is_empty());
        assert_eq!(index.total_size(), 0);
    }

    #[tokio::test]
    async fn test_insert_lookup_and_persist() {
        let f = fixture();
        let index = open(&f).await;
        write_data(&index, "file-a", 10);

        let entry = index.insert("https://a.example/x.png", "file-a".into(), 10).await;
        assert_eq!(entry.size, 10);
        assert_eq!(
            index.lookup("https://a.example/x.png"),
            Some(index.root().join("file-a"))
        );

        let raw = std::fs::read(index.root().join(INDEX_FILE_NAME)).unwrap();
        let stored: IndexFile = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stored.version, INDEX_VERSION);
        assert_eq!(stored.entries, vec![entry]);
    }

    #[tokio::test]
    async fn test_lookup_with_missing_file_is_a_miss_without_mutation() {
        let f = fixture();
        let index = open(&f).await;
        write_data(&index, "file-a", 10);
        index.insert("k", "file-a".into(), 10).await;

        std::fs::remove_file(index.root().join("file-a")).unwrap();

        assert_eq!(index.lookup("k"), None);
        assert!(index.contains("k"));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_deletes_previous_file() {
        let f = fixture();
        let index = open(&f).await;
        write_data(&index, "old", 5);
        write_data(&index, "new", 8);

        index.insert("k", "old".into(), 5).await;
        index.insert("k", "new".into(), 8).await;

        assert_eq!(index.len(), 1);
        assert!(!index.root().join("old").exists());
        assert_eq!(index.lookup("k"), Some(index.root().join("new")));
        assert_eq!(index.total_size(), 8);
    }

    #[tokio::test]
    async fn test_remove_deletes_file_and_is_noop_when_absent() {
        let f = fixture();
        let index = open(&f).await;
        write_data(&index, "file-a", 3);
        index.insert("k", "file-a".into(), 3).await;

        assert!(index.remove("k").await.is_some());
        assert!(!index.root().join("file-a").exists());
        assert!(index.remove("k").await.is_none());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_entries_ordered_by_age() {
        let f = fixture();
        let index = open(&f).await;
        for name in ["a", "b", "c"] {
            write_data(&index, name, 1);
            index.insert(name, name.to_string(), 1).await;
        }

        let keys: Vec<String> = index
            .entries_by_age_ascending()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let stamps: Vec<_> = index
            .entries_by_age_ascending()
            .iter()
            .map(|e| e.created_at)
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_rebuild_prunes_missing_files_and_orphans() {
        let f = fixture();
        {
            let index = open(&f).await;
            write_data(&index, "kept", 4);
            write_data(&index, "deleted-externally", 4);
            index.insert("kept", "kept".into(), 4).await;
            index
                .insert("gone", "deleted-externally".into(), 4)
                .await;
        }

        std::fs::remove_file(f.root.join("deleted-externally")).unwrap();
        std::fs::write(f.root.join("orphan"), b"no record").unwrap();

        let index = open(&f).await;
        assert_eq!(index.len(), 1);
        assert!(index.lookup("kept").is_some());
        assert!(!index.contains("gone"));
        assert!(!f.root.join("orphan").exists());

        // a second restart is a fixed point
        drop(index);
        let index = open(&f).await;
        let names: Vec<String> = index
            .entries_by_age_ascending()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(names, vec!["kept"]);
    }

    #[tokio::test]
    async fn test_corrupt_store_does_not_abort_open() {
        let f = fixture();
        std::fs::create_dir_all(&f.root).unwrap();
        std::fs::write(f.root.join(INDEX_FILE_NAME), b"{ not json").unwrap();
        std::fs::write(f.root.join("untracked"), b"data").unwrap();

        let index = open(&f).await;
        assert!(index.is_empty());
        assert!(!f.root.join("untracked").exists());
        assert!(f.root.join(INDEX_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_remove_relocates_watched_file() {
        let f = fixture();
        let index = open(&f).await;
        write_data(&index, "file-a", 3);
        index.insert("k", "file-a".into(), 3).await;

        let watch = f.in_use.watch(index.lookup("k").unwrap());
        index.remove("k").await;

        let moved = watch.path();
        assert!(moved.starts_with(&f.scratch));
        assert!(moved.exists());
        assert!(!index.root().join("file-a").exists());
    }

    #[tokio::test]
    async fn test_lookup_watched_claims_the_file() {
        let f = fixture();
        let index = open(&f).await;
        write_data(&index, "file-a", 3);
        index.insert("k", "file-a".into(), 3).await;

        let watch = index.lookup_watched("k").unwrap();
        assert!(f.in_use.is_in_use(&index.root().join("file-a")));
        assert!(index.lookup_watched("missing").is_none());

        index.remove("k").await;
        assert!(watch.path().starts_with(&f.scratch));
        assert!(watch.path().exists());
    }

    #[tokio::test]
    async fn test_clear_removes_entries_and_strays() {
        let f = fixture();
        let index = open(&f).await;
        write_data(&index, "a", 1);
        index.insert("a", "a".into(), 1).await;
        write_data(&index, "stray", 1);

        assert_eq!(index.clear().await, 1);
        assert!(index.is_empty());
        assert!(!index.root().join("a").exists());
        assert!(!index.root().join("stray").exists());
        assert!(index.root().join(INDEX_FILE_NAME).exists());
    }
}
