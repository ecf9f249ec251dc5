use reqwest::StatusCode;
use std::path::PathBuf;

use crate::cache::CacheError;

// Error type for transfer and orchestration operations
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server returned status code {0}")]
    StatusCode(StatusCode),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Transfer was cancelled")]
    Cancelled,

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Invalid proxy configuration: {0}")]
    ProxyError(String),
}

impl DownloadError {
    /// Whether this error came from the network transfer itself rather than
    /// from admission into the cache or from local configuration.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            DownloadError::TransferFailed(_)
                | DownloadError::HttpError(_)
                | DownloadError::StatusCode(_)
                | DownloadError::Io(_)
        )
    }

    /// Whether the cache refused the downloaded file.
    pub fn is_admission_rejected(&self) -> bool {
        matches!(
            self,
            DownloadError::Cache(CacheError::EntryTooLarge { .. } | CacheError::AdmissionFailed)
        )
    }
}

/// Failure reported by a [`Decoder`](crate::decoder::Decoder).
#[derive(Debug, thiserror::Error)]
#[error("Failed to decode {}: {reason}", path.display())]
pub struct DecodeError {
    pub path: PathBuf,
    pub reason: String,
}

impl DecodeError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by a [`ResourceItem`](crate::item::ResourceItem).
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("Failed to load resource: {0}")]
    Download(#[from] DownloadError),

    #[error("Decode failed: {0}")]
    DecodeFailed(#[from] DecodeError),

    #[error("Resource item was dropped before the load finished")]
    Dropped,
}
