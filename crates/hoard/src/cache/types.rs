//! # Cache Types
//!
//! This module defines common types used across the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default byte ceiling for the cache (10 MB)
pub const DEFAULT_SIZE_LIMIT: u64 = 10_000_000;

/// Default entry-count ceiling for the cache
pub const DEFAULT_COUNT_LIMIT: u64 = 10;

/// A size or count ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheLimit {
    Unlimited,
    LimitedTo(u64),
}

impl CacheLimit {
    /// Build a limit where `0` means unlimited, the convention used on the command line.
    pub fn from_raw(value: u64) -> Self {
        if value == 0 {
            CacheLimit::Unlimited
        } else {
            CacheLimit::LimitedTo(value)
        }
    }

    /// Whether `value` is above this limit
    pub fn is_exceeded_by(&self, value: u64) -> bool {
        match self {
            CacheLimit::Unlimited => false,
            CacheLimit::LimitedTo(max) => value > *max,
        }
    }
}

impl fmt::Display for CacheLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheLimit::Unlimited => write!(f, "unlimited"),
            CacheLimit::LimitedTo(max) => write!(f, "{max}"),
        }
    }
}

/// One record per cached resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical address of the remote resource
    pub key: String,
    /// Name of the data file inside the cache root
    pub file_name: String,
    /// Size of the file at admission time
    pub size: u64,
    /// Admission timestamp, the eviction ordering key
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Absolute location of the data file under `root`
    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(&self.file_name)
    }
}

/// Configuration for the cache system
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,
    /// Cache root directory; if None, a directory under the system temp dir is used
    pub cache_dir: Option<PathBuf>,
    /// Where in-use files are moved when they are evicted; defaults under the system temp dir
    pub scratch_dir: Option<PathBuf>,
    /// Total byte ceiling
    pub size_limit: CacheLimit,
    /// Entry-count ceiling
    pub count_limit: CacheLimit,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: None,
            scratch_dir: None,
            size_limit: CacheLimit::LimitedTo(DEFAULT_SIZE_LIMIT),
            count_limit: CacheLimit::LimitedTo(DEFAULT_COUNT_LIMIT),
        }
    }
}

impl CacheConfig {
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hoard-cache"))
    }

    pub fn resolved_scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hoard-relocated"))
    }
}

/// Errors produced by the cache layer
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Entry of {size} bytes exceeds the cache size limit of {limit} bytes")]
    EntryTooLarge { size: u64, limit: u64 },

    #[error("Cache limits cannot be satisfied for the incoming entry")]
    AdmissionFailed,

    #[error("Cache index persistence failed: {0}")]
    Persistence(String),

    #[error("Cache I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_from_raw() {
        assert_eq!(CacheLimit::from_raw(0), CacheLimit::Unlimited);
        assert_eq!(CacheLimit::from_raw(42), CacheLimit::LimitedTo(42));
    }

    #[test]
    fn test_limit_exceeded() {
        assert!(!CacheLimit::Unlimited.is_exceeded_by(u64::MAX));
        assert!(!CacheLimit::LimitedTo(1000).is_exceeded_by(1000));
        assert!(CacheLimit::LimitedTo(1000).is_exceeded_by(1001));
    }

    #[test]
    fn test_default_config_matches_documented_limits() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.size_limit, CacheLimit::LimitedTo(10_000_000));
        assert_eq!(config.count_limit, CacheLimit::LimitedTo(10));
    }
}
