//! # Download Orchestrator
//!
//! [`FileDownloader`] answers a fetch from the bounded cache when it can, and
//! otherwise runs a transfer through the [`Transport`] and admits the result
//! into the cache before reporting the final file. Every delivered file is
//! already claimed in the in-use registry, so the cache cannot delete it
//! between delivery and use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{BoundedCache, FileWatch, InUseRegistry};
use crate::transfer::{
    CompletionCallback, ProgressCallback, TransferHandle, TransferId, TransferRegistry,
};
use crate::transport::{Transport, TransportEvent};
use crate::{DownloadError, FetchConfig};

/// Canonical cache key for a resource address
pub fn resource_key(key: &str) -> Result<Url, DownloadError> {
    Url::parse(key).map_err(|e| DownloadError::InvalidUrl(format!("{key}: {e}")))
}

/// Fetches resources through the cache
#[derive(Clone)]
pub struct FileDownloader {
    transport: Arc<dyn Transport>,
    cache: Option<BoundedCache>,
    in_use: InUseRegistry,
    registry: TransferRegistry,
    config: FetchConfig,
}

impl FileDownloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Option<BoundedCache>,
        config: FetchConfig,
    ) -> Self {
        let in_use = cache
            .as_ref()
            .map(|cache| cache.in_use().clone())
            .unwrap_or_default();
        Self {
            transport,
            cache,
            in_use,
            registry: TransferRegistry::new(),
            config,
        }
    }

    pub fn cache(&self) -> Option<&BoundedCache> {
        self.cache.as_ref()
    }

    /// Registry holding the claims on delivered files
    pub fn in_use(&self) -> &InUseRegistry {
        &self.in_use
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `key`, reporting progress and the final local file.
    ///
    /// A cache hit completes synchronously, before this returns, and yields a
    /// no-op handle. Otherwise the transfer runs on a spawned task, so this
    /// must be called from within a tokio runtime.
    pub fn fetch(
        &self,
        key: &str,
        invalidate_cache: bool,
        on_progress: Option<ProgressCallback>,
        on_complete: CompletionCallback,
    ) -> TransferHandle {
        let url = match resource_key(key) {
            Ok(url) => url,
            Err(e) => {
                warn!(key, error = %e, "Rejecting fetch");
                on_complete(Err(e));
                return TransferHandle::noop();
            }
        };

        if !invalidate_cache {
            if let Some(file) = self.cache.as_ref().and_then(|c| c.lookup_watched(url.as_str())) {
                debug!(url = %url, path = %file.path().display(), "Cache hit");
                on_complete(Ok(file));
                return TransferHandle::noop();
            }
        }

        let (id, token) = self.registry.register(url.clone(), on_progress, on_complete);
        let this = self.clone();
        tokio::spawn(async move { this.run_transfer(id, token, url).await });

        TransferHandle::new(id, self.registry.clone())
    }

    /// Cancel a transfer started by [`FileDownloader::fetch`]
    pub fn cancel(&self, handle: &TransferHandle) -> bool {
        handle.cancel()
    }

    /// Number of transfers currently in flight
    pub fn active_transfers(&self) -> usize {
        self.registry.active_count()
    }

    #[instrument(skip_all, fields(transfer = %id, url = %url), level = "debug")]
    async fn run_transfer(&self, id: TransferId, token: CancellationToken, url: Url) {
        let downloaded = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Transfer aborted");
                return;
            }
            result = self.download(id, &url) => result,
        };

        let result = match downloaded {
            Ok(temp) => self.store(id, &url, temp).await,
            Err(e) => {
                warn!(error = %e, "Transfer failed");
                Err(e)
            }
        };

        let stored = result.as_ref().ok().map(FileWatch::path);
        if !self.registry.complete(id, result) {
            debug!("Transfer cancelled before its result was delivered");
            if let Some(path) = stored {
                self.discard(&url, &path).await;
            }
        }
    }

    /// Take back a file stored for a transfer that was cancelled meanwhile
    async fn discard(&self, url: &Url, path: &Path) {
        match &self.cache {
            Some(cache) => {
                if cache.evict_file(url.as_str(), path).await.is_some() {
                    debug!(path = %path.display(), "Withdrew admission of cancelled transfer");
                }
            }
            None => {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove discarded download");
                }
            }
        }
    }

    async fn download(&self, id: TransferId, url: &Url) -> Result<PathBuf, DownloadError> {
        let mut stream = self.transport.start_download(url).await?;

        while let Some(event) = stream.next().await {
            match event? {
                TransportEvent::Progress { received, total } => {
                    self.registry
                        .report_progress(id, self.progress_fraction(received, total));
                }
                TransportEvent::Finished(path) => {
                    self.registry.report_progress(id, 1.0);
                    return Ok(path);
                }
            }
        }

        Err(DownloadError::TransferFailed(
            "transport ended without producing a file".to_string(),
        ))
    }

    fn progress_fraction(&self, received: u64, total: Option<u64>) -> f32 {
        match total {
            Some(total) if total > 0 => (received as f64 / total as f64).min(1.0) as f32,
            _ => self.config.indeterminate_progress,
        }
    }

    /// Move a finished download into the cache, unless the transfer was cancelled meanwhile
    async fn store(&self, id: TransferId, url: &Url, temp: PathBuf) -> Result<FileWatch, DownloadError> {
        if !self.registry.is_active(id) {
            debug!(path = %temp.display(), "Discarding download of cancelled transfer");
            if let Err(e) = tokio::fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %e, "Failed to remove discarded download");
            }
            return Err(DownloadError::Cancelled);
        }

        let Some(cache) = &self.cache else {
            return Ok(self.in_use.watch(temp));
        };

        match cache.admit_watched(&temp, url.as_str()).await {
            Ok(file) => {
                info!(path = %file.path().display(), "Download cached");
                Ok(file)
            }
            Err(e) => {
                warn!(path = %temp.display(), error = %e, "Cache rejected download");
                Err(e.into())
            }
        }
    }
}
