//! # Hoard
//!
//! A caching download manager. Remote resources are fetched over HTTP,
//! admitted into a size- and count-bounded on-disk cache, and exposed to
//! consumers through per-resource state machines.
//!
//! ## Features
//!
//! - Persisted cache index rebuilt against the directory on startup
//! - Oldest-first eviction under byte and entry-count limits
//! - Files still in use are relocated instead of deleted on eviction
//! - Cancellable transfers with progress reporting
//! - Resource items with observers and pluggable decoders

pub mod builder;
pub mod cache;
pub mod config;
pub mod context;
pub mod decoder;
pub mod downloader;
pub mod error;
pub mod item;
pub mod proxy;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use builder::HoardConfigBuilder;
pub use cache::{
    BoundedCache, CacheConfig, CacheEntry, CacheError, CacheLimit, DEFAULT_COUNT_LIMIT,
    DEFAULT_SIZE_LIMIT, FileWatch, InUseRegistry,
};
pub use config::{DecodeFailurePolicy, DownloaderConfig, FetchConfig, HoardConfig};
pub use context::Hoard;
pub use error::{DecodeError, DownloadError, ItemError};

// Re-export orchestration types
pub use downloader::{FileDownloader, resource_key};
pub use transfer::{CompletionCallback, ProgressCallback, TransferHandle, TransferId};
pub use transport::{HttpTransport, Transport, TransportEvent, create_client};

// Re-export item types
pub use decoder::{BytesDecoder, Decoder, SizeHint, TextDecoder};
pub use item::{ItemObserver, LoadState, ObserverId, ResourceItem};

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
