//! # Cache System
//!
//! This module persists downloaded files under a bounded cache policy:
//! a persisted index of admitted files, admission control with oldest-first
//! eviction, and an in-use registry that lets eviction relocate files that
//! are still referenced instead of deleting them.

// Module declarations
mod bounded;
mod in_use;
mod index;
mod types;
mod utils;

// Re-export primary types from our various modules
pub use bounded::BoundedCache;
pub use in_use::{Disposal, FileWatch, InUseRegistry};
pub use index::{CacheIndex, INDEX_FILE_NAME};
pub use types::{
    CacheConfig, CacheEntry, CacheError, CacheLimit, CacheResult, DEFAULT_COUNT_LIMIT,
    DEFAULT_SIZE_LIMIT,
};
