//! One-shot tracker connection: connect, write one request line, read one
//! response line, close.

use std::time::Duration;

use mogile_core::{LineEncoding, TrackerAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Longest response line accepted from a tracker.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024; // 16 MiB
const READ_CHUNK: usize = 8 * 1024;

/// Transport failure talking to one tracker.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Could not connect (refused, unreachable, or connect timeout).
    #[error("cannot connect to tracker {tracker}: {source}")]
    Connect {
        tracker: TrackerAddr,
        #[source]
        source: std::io::Error,
    },
    /// Connection broke while writing the request or reading the response.
    #[error("i/o error with tracker {tracker}: {source}")]
    Io {
        tracker: TrackerAddr,
        #[source]
        source: std::io::Error,
    },
    /// No activity on the connection for the idle timeout.
    #[error("tracker {tracker} idle for {after:?}")]
    Timeout { tracker: TrackerAddr, after: Duration },
    #[error("response from tracker {tracker} exceeds {MAX_FRAME_LEN} bytes")]
    FrameTooLarge { tracker: TrackerAddr },
}

impl ChannelError {
    /// Whether the caller should give up on this tracker and try the next one.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ChannelError::Connect { .. } | ChannelError::Io { .. })
    }
}

/// Sends raw request lines to trackers.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    encoding: LineEncoding,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl CommandChannel {
    pub fn new(encoding: LineEncoding, connect_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            encoding,
            connect_timeout,
            idle_timeout,
        }
    }

    pub fn encoding(&self) -> LineEncoding {
        self.encoding
    }

    /// Send one encoded request and return the raw response line.
    /// The idle timeout applies per write/read and only closes this connection.
    pub async fn send(&self, tracker: &TrackerAddr, request: &[u8]) -> Result<String, ChannelError> {
        let connect = TcpStream::connect((tracker.host(), tracker.port()));
        let mut stream = match timeout(self.connect_timeout, connect).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(ChannelError::Connect {
                    tracker: tracker.clone(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(ChannelError::Connect {
                    tracker: tracker.clone(),
                    source: std::io::ErrorKind::TimedOut.into(),
                })
            }
        };
        debug!(%tracker, bytes = request.len(), "sending tracker request");

        let io_err = |e: std::io::Error| ChannelError::Io {
            tracker: tracker.clone(),
            source: e,
        };
        let timed_out = || ChannelError::Timeout {
            tracker: tracker.clone(),
            after: self.idle_timeout,
        };

        timeout(self.idle_timeout, stream.write_all(request))
            .await
            .map_err(|_| timed_out())?
            .map_err(io_err)?;

        let mut frame = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = timeout(self.idle_timeout, stream.read(&mut buf))
                .await
                .map_err(|_| timed_out())?
                .map_err(io_err)?;
            if n == 0 {
                break;
            }
            frame.extend_from_slice(&buf[..n]);
            if buf[..n].contains(&b'\n') {
                break;
            }
            if frame.len() > MAX_FRAME_LEN {
                return Err(ChannelError::FrameTooLarge {
                    tracker: tracker.clone(),
                });
            }
        }
        let _ = stream.shutdown().await;
        Ok(self.encoding.decode(&frame))
    }
}
