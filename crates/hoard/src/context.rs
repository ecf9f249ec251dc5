//! # Hoard context
//!
//! Owns the shared pieces of a caching download setup: the in-use registry,
//! the bounded cache, the transport and the orchestrator. Build one at startup
//! and hand out [`ResourceItem`]s from it.

use std::sync::Arc;

use tracing::info;

use crate::cache::{BoundedCache, InUseRegistry};
use crate::decoder::{BytesDecoder, Decoder};
use crate::item::ResourceItem;
use crate::transport::{HttpTransport, Transport};
use crate::{DownloadError, FileDownloader, HoardConfig};

pub struct Hoard {
    config: HoardConfig,
    downloader: FileDownloader,
}

impl Hoard {
    /// Build a context that downloads over HTTP
    pub async fn new(config: HoardConfig) -> Result<Self, DownloadError> {
        let transport = HttpTransport::new(&config.downloader)?;
        Self::with_transport(config, Arc::new(transport)).await
    }

    /// Build a context around a custom transport
    pub async fn with_transport(
        config: HoardConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, DownloadError> {
        let cache = if config.cache.enabled {
            Some(BoundedCache::open(&config.cache, InUseRegistry::new()).await?)
        } else {
            info!("Caching disabled, downloads are returned in place");
            None
        };

        let downloader = FileDownloader::new(transport, cache, config.fetch);
        Ok(Self { config, downloader })
    }

    pub fn config(&self) -> &HoardConfig {
        &self.config
    }

    pub fn downloader(&self) -> &FileDownloader {
        &self.downloader
    }

    pub fn cache(&self) -> Option<&BoundedCache> {
        self.downloader.cache()
    }

    /// Item for `key` that decodes to raw bytes
    pub fn item(&self, key: impl Into<String>) -> ResourceItem<BytesDecoder> {
        self.item_with_decoder(key, BytesDecoder)
    }

    pub fn item_with_decoder<D: Decoder>(&self, key: impl Into<String>, decoder: D) -> ResourceItem<D> {
        ResourceItem::new(
            key,
            self.downloader.clone(),
            decoder,
            self.config.fetch.decode_failure_policy,
        )
    }
}
