//! Storage-node transfers: stream file bytes over HTTP GET/PUT.
//!
//! Downloads are pull-driven: the next body chunk is only read once the previous
//! one has been accepted by the bounded local write buffer, so a slow disk pauses
//! the network side instead of growing memory. A download completes only after
//! the buffer has been flushed. Uploads declare `Content-Length` and stream the
//! file as the request body.
//!
//! The idle timeout bounds each wait on a storage node: the response headers,
//! every download chunk, and any stretch of an upload in which the node takes
//! no body bytes.
//!
//! Nothing here knows about trackers; callers follow an upload with `CREATE_CLOSE`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use reqwest::header::CONTENT_LENGTH;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

/// Read size for upload bodies.
const UPLOAD_CHUNK: usize = 512 * 1024; // 512 KiB

/// Local file or HTTP failure during a transfer. Never retried here.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),
    #[error("invalid storage url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported storage url scheme in {0:?}")]
    UnsupportedScheme(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage node {url} idle for {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("storage node returned {status} for {method} {url}")]
    Status {
        method: &'static str,
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Moves bytes between local files and storage-node URLs.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    http: reqwest::Client,
    idle_timeout: Duration,
    write_buffer: usize,
}

impl TransferEngine {
    pub fn new(
        connect_timeout: Duration,
        idle_timeout: Duration,
        write_buffer: usize,
    ) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            http,
            idle_timeout,
            write_buffer: write_buffer.max(1),
        })
    }

    fn timed_out(&self, url: &Url) -> TransferError {
        TransferError::Timeout {
            url: url.to_string(),
            after: self.idle_timeout,
        }
    }

    /// GET `url` into `local` (created or truncated). Returns the bytes written.
    /// A failed download removes the partial file.
    pub async fn download(&self, url: &str, local: &Path) -> Result<u64, TransferError> {
        let url = storage_url(url)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(local)
            .await
            .map_err(|e| io_error(local, e))?;
        match self.fetch_into(url, file, local).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(local).await {
                    warn!(path = %local.display(), error = %rm, "could not remove partial download");
                }
                Err(e)
            }
        }
    }

    async fn fetch_into(&self, url: Url, file: File, local: &Path) -> Result<u64, TransferError> {
        let mut resp = timeout(self.idle_timeout, self.http.get(url.clone()).send())
            .await
            .map_err(|_| self.timed_out(&url))??;
        if !resp.status().is_success() {
            return Err(TransferError::Status {
                method: "GET",
                url: url.to_string(),
                status: resp.status(),
            });
        }
        let mut out = BufWriter::with_capacity(self.write_buffer, file);
        let mut bytes: u64 = 0;
        while let Some(chunk) = timeout(self.idle_timeout, resp.chunk())
            .await
            .map_err(|_| self.timed_out(&url))??
        {
            // Not pulling the next chunk until this one is buffered is the pause.
            out.write_all(&chunk).await.map_err(|e| io_error(local, e))?;
            bytes += chunk.len() as u64;
        }
        out.flush().await.map_err(|e| io_error(local, e))?;
        debug!(%url, bytes, path = %local.display(), "download complete");
        Ok(bytes)
    }

    /// PUT `local` to `url` with `Content-Length` set to the file size. Returns the size.
    pub async fn upload(&self, local: &Path, url: &str) -> Result<u64, TransferError> {
        let url = storage_url(url)?;
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|e| io_error(local, e))?;
        if !meta.is_file() {
            return Err(TransferError::NotAFile(local.to_path_buf()));
        }
        let size = meta.len();
        let file = File::open(local).await.map_err(|e| io_error(local, e))?;
        let sent = Arc::new(AtomicU64::new(0));
        let mut request = Box::pin(
            self.http
                .put(url.clone())
                .header(CONTENT_LENGTH, size)
                .body(reqwest::Body::wrap_stream(file_chunks(file, sent.clone())))
                .send(),
        );
        // Only a whole idle window without the node taking body bytes is a timeout.
        let mut seen = 0;
        let resp = loop {
            match timeout(self.idle_timeout, &mut request).await {
                Ok(resp) => break resp?,
                Err(_) => {
                    let now = sent.load(Ordering::Relaxed);
                    if now == seen {
                        return Err(self.timed_out(&url));
                    }
                    seen = now;
                }
            }
        };
        if !resp.status().is_success() {
            return Err(TransferError::Status {
                method: "PUT",
                url: url.to_string(),
                status: resp.status(),
            });
        }
        debug!(%url, bytes = size, path = %local.display(), "upload complete");
        Ok(size)
    }
}

/// File contents as a stream of chunks for a request body. `sent` counts the
/// bytes handed to the connection.
fn file_chunks(
    file: File,
    sent: Arc<AtomicU64>,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    stream::try_unfold((file, sent), |(mut file, sent)| async move {
        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        sent.fetch_add(n as u64, Ordering::Relaxed);
        Ok(Some((buf, (file, sent))))
    })
}

fn storage_url(raw: &str) -> Result<Url, TransferError> {
    let url = Url::parse(raw).map_err(|e| TransferError::InvalidUrl {
        url: raw.to_string(),
        source: e,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(TransferError::UnsupportedScheme(raw.to_string())),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}
