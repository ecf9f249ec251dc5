use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::{CacheConfig, proxy::ProxyConfig};

const DEFAULT_USER_AGENT: &str = concat!("hoard/", env!("CARGO_PKG_VERSION"));

/// Progress reported while the total size of a transfer is unknown
pub const DEFAULT_INDETERMINATE_PROGRESS: f32 = 0.5;

/// HTTP transport options
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Idle timeout for pooled connections
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    /// Where in-progress downloads are written; defaults under the system temp dir
    pub download_dir: Option<PathBuf>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
            download_dir: None,
        }
    }
}

impl DownloaderConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }

    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hoard-downloads"))
    }
}

/// What a resource item does when a cached file cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum DecodeFailurePolicy {
    /// Keep the entry; only the failing request errors
    #[default]
    Keep,
    /// Evict the entry so the next load downloads it again
    Evict,
}

/// Policies applied by the orchestrator and resource items
#[derive(Debug, Clone, Copy)]
pub struct FetchConfig {
    /// Value reported to progress observers when the total size is unknown
    pub indeterminate_progress: f32,
    /// Handling of cached files that fail to decode
    pub decode_failure_policy: DecodeFailurePolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            indeterminate_progress: DEFAULT_INDETERMINATE_PROGRESS,
            decode_failure_policy: DecodeFailurePolicy::Keep,
        }
    }
}

/// Complete configuration for a [`Hoard`](crate::Hoard) context
#[derive(Debug, Clone, Default)]
pub struct HoardConfig {
    pub downloader: DownloaderConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
}

impl HoardConfig {
    pub fn builder() -> crate::builder::HoardConfigBuilder {
        crate::builder::HoardConfigBuilder::new()
    }
}
