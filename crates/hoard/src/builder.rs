//! # Builder for HoardConfig
//!
//! Fluent construction of [`HoardConfig`] covering the transport, cache and
//! fetch policy sections.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use hoard_engine::{CacheLimit, HoardConfig};
//!
//! let config = HoardConfig::builder()
//!     .with_timeout(Duration::from_secs(30))
//!     .with_user_agent("MyApp/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .with_cache_dir("/tmp/my-cache")
//!     .with_size_limit(CacheLimit::LimitedTo(50_000_000))
//!     .with_count_limit(CacheLimit::Unlimited)
//!     .build();
//!
//! assert!(config.cache.enabled);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::{
    CacheConfig, CacheLimit, DecodeFailurePolicy, DownloaderConfig, FetchConfig, HoardConfig,
    proxy::ProxyConfig,
};

/// Builder for creating HoardConfig instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct HoardConfigBuilder {
    config: HoardConfig,
}

impl HoardConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole transport section
    pub fn with_downloader_config(mut self, downloader: DownloaderConfig) -> Self {
        self.config.downloader = downloader;
        self
    }

    /// Replace the whole cache section
    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Replace the whole fetch policy section
    pub fn with_fetch_config(mut self, fetch: FetchConfig) -> Self {
        self.config.fetch = fetch;
        self
    }

    /// Enable or disable caching
    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache.cache_dir = Some(dir.into());
        self
    }

    /// Set where evicted files that are still in use get moved
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_size_limit(mut self, limit: CacheLimit) -> Self {
        self.config.cache.size_limit = limit;
        self
    }

    pub fn with_count_limit(mut self, limit: CacheLimit) -> Self {
        self.config.cache.count_limit = limit;
        self
    }

    /// Set the directory in-progress downloads are written to
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.downloader.download_dir = Some(dir.into());
        self
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.downloader.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.downloader.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.downloader.read_timeout = timeout;
        self
    }

    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.downloader.follow_redirects = follow;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.downloader.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.downloader.headers.insert(name, value);
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.downloader.headers = headers;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.downloader.proxy = Some(proxy);
        self.config.downloader.use_system_proxy = false; // Explicit proxy overrides system proxy
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.config.downloader.proxy.is_none() {
            self.config.downloader.use_system_proxy = use_system_proxy;
        }
        self
    }

    /// Set the progress value reported while the total size is unknown
    pub fn with_indeterminate_progress(mut self, value: f32) -> Self {
        self.config.fetch.indeterminate_progress = value.clamp(0.0, 1.0);
        self
    }

    pub fn with_decode_failure_policy(mut self, policy: DecodeFailurePolicy) -> Self {
        self.config.fetch.decode_failure_policy = policy;
        self
    }

    pub fn build(self) -> HoardConfig {
        self.config
    }
}
