//! # Transport
//!
//! Network side of a fetch: a [`Transport`] turns a URL into a stream of
//! progress events that ends with the path of a fully written temporary file.
//! Dropping the stream aborts the transfer and removes the partial file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::{Client, Response};
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use url::Url;

use crate::{DownloadError, DownloaderConfig};

/// Events emitted while a transfer runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes received so far, and the expected total if the server announced one
    Progress { received: u64, total: Option<u64> },
    /// The body was fully written to this temporary file
    Finished(PathBuf),
}

pub type TransportStream = BoxStream<'static, Result<TransportEvent, DownloadError>>;

/// Something that can download a URL into a local file
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start_download(&self, url: &Url) -> Result<TransportStream, DownloadError>;
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let provider = Arc::new(aws_lc_rs::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DownloadError::Tls(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| DownloadError::Tls(e.to_string()))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = proxy_config.to_reqwest().map_err(DownloadError::ProxyError)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy for downloads");
    } else if config.use_system_proxy {
        // reqwest picks up system proxy settings unless no_proxy() is called
        debug!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}

/// HTTP(S) transport backed by reqwest
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    download_dir: PathBuf,
}

impl HttpTransport {
    pub fn new(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        Ok(Self {
            client: create_client(config)?,
            download_dir: config.resolved_download_dir(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self), level = "debug")]
    async fn start_download(&self, url: &Url) -> Result<TransportStream, DownloadError> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(DownloadError::StatusCode(response.status()));
        }

        fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(uuid::Uuid::new_v4().to_string());

        debug!(
            url = %url,
            total = ?response.content_length(),
            path = %path.display(),
            "Download started"
        );
        Ok(body_to_file(response, path).boxed())
    }
}

fn body_to_file(
    response: Response,
    path: PathBuf,
) -> impl Stream<Item = Result<TransportEvent, DownloadError>> + Send + 'static {
    async_stream::try_stream! {
        let total = response.content_length();
        let mut partial = PartialFile::create(path).await?;
        let mut body = response.bytes_stream();
        let mut received = 0u64;

        yield TransportEvent::Progress { received, total };

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            partial.file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            yield TransportEvent::Progress { received, total };
        }

        partial.file.flush().await?;
        partial.file.sync_all().await?;
        yield TransportEvent::Finished(partial.finish());
    }
}

/// Temporary download target, removed on drop unless finished
struct PartialFile {
    path: PathBuf,
    file: File,
    finished: bool,
}

impl PartialFile {
    async fn create(path: PathBuf) -> Result<Self, DownloadError> {
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file,
            finished: false,
        })
    }

    fn finish(mut self) -> PathBuf {
        self.finished = true;
        self.path.clone()
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.finished {
            debug!(path = %self.path.display(), "Removing partial download");
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per accepted connection
    async fn serve(response: &'static [u8]) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut request = Vec::new();
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let _ = socket.write_all(response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        Url::parse(&format!("http://{addr}/resource.bin")).unwrap()
    }

    fn transport(dir: &Path) -> HttpTransport {
        let config = DownloaderConfig {
            use_system_proxy: false,
            download_dir: Some(dir.to_path_buf()),
            ..DownloaderConfig::default()
        };
        HttpTransport::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_download_to_file() {
        let dir = tempdir().unwrap();
        let url = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
            .await;

        let mut stream = transport(dir.path()).start_download(&url).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(
            events.first(),
            Some(&TransportEvent::Progress {
                received: 0,
                total: Some(5)
            })
        );
        let Some(TransportEvent::Finished(path)) = events.last() else {
            panic!("stream did not finish: {events:?}");
        };
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
        assert!(path.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_error_status() {
        let dir = tempdir().unwrap();
        let url = serve(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await;

        let result = transport(dir.path()).start_download(&url).await;
        match result {
            Err(DownloadError::StatusCode(status)) => assert_eq!(status.as_u16(), 404),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("404 must not start a download"),
        }
    }

    #[tokio::test]
    async fn test_dropped_stream_removes_partial_file() {
        let dir = tempdir().unwrap();
        let url = serve(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
            .await;

        let mut stream = transport(dir.path()).start_download(&url).await.unwrap();
        // First event is emitted after the file is created
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, TransportEvent::Progress { received: 0, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(stream);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
