//! DAP transport channel
//!
//! Frames are a header block terminated by an empty line, followed by a JSON body:
//! `Content-Length: <n>\r\n\r\n<n bytes of UTF-8 JSON>`.
//! The writer half serializes concurrent senders behind a lock so frames never
//! interleave; the reader half is owned by a single background loop.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::protocol::ProtocolMessage;
use crate::error::TransportError;

/// Upper bound on a single frame body. Larger frames are treated as corrupt.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "content-length";

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A duplex connection to a debug adapter, before it is split between the
/// reader loop and the senders.
pub struct TransportChannel {
    pub reader: FrameReader,
    pub writer: FrameWriter,
}

impl TransportChannel {
    /// Connect to a listening adapter, retrying with backoff until `timeout` elapses.
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let start = tokio::time::Instant::now();
        let mut delay = Duration::from_millis(50);

        loop {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    debug!("Connected to debug adapter at {}", endpoint);
                    return Ok(Self::from_stream(stream));
                }
                Err(_) if start.elapsed() < timeout => {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_millis(500));
                }
                Err(e) => {
                    return Err(TransportError::ConnectionFailed(format!(
                        "{} unreachable after {:?}: {}",
                        endpoint, timeout, e
                    )));
                }
            }
        }
    }

    /// Wrap any duplex byte stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(Box::new(read_half), Box::new(write_half))
    }

    pub fn from_parts(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }
}

/// Decoding half of the channel.
pub struct FrameReader {
    inner: BufReader<BoxedReader>,
}

impl FrameReader {
    pub fn new(reader: BoxedReader) -> Self {
        Self { inner: BufReader::new(reader) }
    }

    /// Block until exactly one complete message has been decoded.
    pub async fn receive(&mut self) -> Result<ProtocolMessage, TransportError> {
        let len = self.read_header().await?;
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;

        trace!("<- {}", String::from_utf8_lossy(&body));
        serde_json::from_slice(&body)
            .map_err(|e| TransportError::MalformedFrame(format!("invalid message body: {}", e)))
    }

    async fn read_header(&mut self) -> Result<usize, TransportError> {
        let mut content_length = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let n = self.inner.read_line(&mut line).await?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed);
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                // Tolerate stray blank lines between frames
                if saw_header {
                    break;
                }
                continue;
            }
            saw_header = true;

            let Some((name, value)) = line.split_once(':') else {
                return Err(TransportError::MalformedFrame(format!("bad header line '{}'", line)));
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let len = value.trim().parse::<usize>().map_err(|e| {
                    TransportError::MalformedFrame(format!("bad Content-Length '{}': {}", value.trim(), e))
                })?;
                content_length = Some(len);
            }
        }

        match content_length {
            Some(len) if len > MAX_FRAME_LEN => Err(TransportError::MalformedFrame(format!(
                "frame of {} bytes exceeds limit",
                len
            ))),
            Some(len) => Ok(len),
            None => Err(TransportError::MalformedFrame("missing Content-Length header".to_string())),
        }
    }
}

/// Encoding half of the channel.
pub struct FrameWriter {
    inner: Mutex<BoxedWriter>,
}

impl FrameWriter {
    pub fn new(writer: BoxedWriter) -> Self {
        Self { inner: Mutex::new(writer) }
    }

    /// Serialize and write one message as a single frame.
    pub async fn send(&self, message: &ProtocolMessage) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        trace!("-> {}", String::from_utf8_lossy(&frame));

        let mut writer = self.inner.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the write side. Errors are ignored since the peer may already be gone.
    pub async fn close(&self) {
        let mut writer = self.inner.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Encode a message into a complete frame (header + body).
pub fn encode_frame(message: &ProtocolMessage) -> Result<Vec<u8>, TransportError> {
    let body = serde_json::to_vec(message)
        .map_err(|e| TransportError::MalformedFrame(format!("cannot encode message: {}", e)))?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}
