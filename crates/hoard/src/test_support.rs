//! Scripted transport and fixtures shared by the orchestrator and item tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tempfile::{TempDir, tempdir};
use tokio::sync::oneshot;
use url::Url;

use crate::cache::{BoundedCache, CacheConfig, CacheLimit, InUseRegistry};
use crate::transport::{Transport, TransportEvent, TransportStream};
use crate::{DownloadError, FetchConfig, FileDownloader};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Wait until `path` is gone, failing the test after a few seconds
pub async fn wait_for_removal(path: &Path) {
    let removed = tokio::time::timeout(Duration::from_secs(5), async {
        while path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(removed.is_ok(), "{} was not removed", path.display());
}

/// What the next call to `start_download` does
pub enum Step {
    /// Emit progress and finish with a file holding `body`
    Deliver { body: Vec<u8>, announce_total: bool },
    /// Fail before any event
    Refuse,
    /// Fail after the first progress event
    Abort,
    /// Wait for the gate, then finish with a file holding `body`
    Gated {
        body: Vec<u8>,
        gate: oneshot::Receiver<()>,
    },
}

impl Step {
    pub fn deliver(body: &[u8]) -> Self {
        Step::Deliver {
            body: body.to_vec(),
            announce_total: true,
        }
    }
}

#[derive(Clone)]
pub struct ScriptedTransport {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<AtomicUsize>,
    dir: PathBuf,
}

impl ScriptedTransport {
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).unwrap();
        Self {
            steps: Arc::default(),
            calls: Arc::default(),
            dir: dir.to_path_buf(),
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn temp_file(&self, body: &[u8]) -> PathBuf {
        let path = self.dir.join(uuid::Uuid::new_v4().to_string());
        std::fs::write(&path, body).unwrap();
        path
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn start_download(&self, url: &Url) -> Result<TransportStream, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step {
            None | Some(Step::Refuse) => Err(DownloadError::TransferFailed(format!(
                "refused {url}"
            ))),
            Some(Step::Deliver {
                body,
                announce_total,
            }) => {
                let total = announce_total.then_some(body.len() as u64);
                let path = self.temp_file(&body);
                let events = vec![
                    Ok(TransportEvent::Progress { received: 0, total }),
                    Ok(TransportEvent::Progress {
                        received: body.len() as u64,
                        total,
                    }),
                    Ok(TransportEvent::Finished(path)),
                ];
                Ok(futures::stream::iter(events).boxed())
            }
            Some(Step::Abort) => {
                let events = vec![
                    Ok(TransportEvent::Progress {
                        received: 0,
                        total: Some(10),
                    }),
                    Err(DownloadError::TransferFailed("connection reset".to_string())),
                ];
                Ok(futures::stream::iter(events).boxed())
            }
            Some(Step::Gated { body, gate }) => {
                let this = self.clone();
                Ok(async_stream::stream! {
                    let _ = gate.await;
                    yield Ok::<_, DownloadError>(TransportEvent::Finished(this.temp_file(&body)));
                }
                .boxed())
            }
        }
    }
}

/// Orchestrator over a scripted transport and a bounded cache in a temp dir
pub struct Harness {
    pub dir: TempDir,
    pub transport: ScriptedTransport,
    pub downloader: FileDownloader,
}

impl Harness {
    pub async fn new(size: CacheLimit, count: CacheLimit) -> Self {
        Self::with_fetch_config(size, count, FetchConfig::default()).await
    }

    pub async fn with_fetch_config(size: CacheLimit, count: CacheLimit, fetch: FetchConfig) -> Self {
        init_tracing();
        let dir = tempdir().unwrap();
        let config = CacheConfig {
            enabled: true,
            cache_dir: Some(dir.path().join("cache")),
            scratch_dir: Some(dir.path().join("scratch")),
            size_limit: size,
            count_limit: count,
        };
        let cache = BoundedCache::open(&config, InUseRegistry::new())
            .await
            .unwrap();
        let transport = ScriptedTransport::new(&dir.path().join("downloads"));
        let downloader = FileDownloader::new(Arc::new(transport.clone()), Some(cache), fetch);
        Self {
            dir,
            transport,
            downloader,
        }
    }

    pub fn cache(&self) -> &BoundedCache {
        self.downloader.cache().unwrap()
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }
}
