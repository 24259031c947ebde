//! Upgrade request classification and acceptance.
//!
//! The request head is read before `tungstenite` sees the stream so that
//! plain HTTP requests can be answered with a client error instead of a
//! failed handshake. Accepted requests are replayed to `tungstenite`
//! through [`Rewind`].
//!
//! # Outcomes
//!
//! | Request | Outcome |
//! |---------|---------|
//! | Not a WebSocket upgrade | `400 Bad Request`, connection closed |
//! | Upgrade outside the configured path | `404 Not Found`, connection closed |
//! | Upgrade on the configured path | [`Handshake::Accepted`] |

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::options::ServerOptions;

// ============================================================================
// Constants
// ============================================================================

/// Largest request head accepted.
const MAX_HEAD_SIZE: usize = 8 * 1024;

/// Most header lines accepted in a request head.
const MAX_HEADERS: usize = 64;

// ============================================================================
// Handshake
// ============================================================================

/// Result of [`accept`].
pub enum Handshake<S> {
    /// The upgrade completed.
    Accepted {
        /// Upgraded stream.
        stream: WebSocketStream<Rewind<S>>,
        /// Request target, including any query string.
        path: String,
    },

    /// The request was answered with a client error and dropped.
    Rejected(StatusCode),
}

impl<S> std::fmt::Debug for Handshake<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted { path, .. } => f.debug_struct("Accepted").field("path", path).finish(),
            Self::Rejected(status) => f.debug_tuple("Rejected").field(status).finish(),
        }
    }
}

/// Reads the request head, classifies it and either completes the upgrade
/// or answers with a client error.
///
/// The whole exchange is bounded by `options.handshake_timeout`.
///
/// # Errors
///
/// - [`Error::Timeout`] if the handshake does not finish in time
/// - [`Error::Protocol`] if the head is oversized or the stream ends early
/// - [`Error::WebSocket`] if `tungstenite` rejects the upgrade
pub async fn accept<S>(stream: S, options: &ServerOptions) -> Result<Handshake<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let limit = options.handshake_timeout;

    timeout(limit, negotiate(stream, options))
        .await
        .map_err(|_| Error::timeout("WebSocket handshake", limit.as_millis() as u64))?
}

async fn negotiate<S>(mut stream: S, options: &ServerOptions) -> Result<Handshake<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, request) = read_head(&mut stream).await?;

    let path = match request {
        Request::Upgrade { path } => path,
        Request::Plain => return reject(stream, StatusCode::BAD_REQUEST).await,
    };

    if !options.matches_path(&path) {
        debug!(%path, "Upgrade request outside served path");
        return reject(stream, StatusCode::NOT_FOUND).await;
    }

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(options.max_message_size);

    let stream = Rewind::new(head, stream);
    let stream = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;

    trace!(%path, "WebSocket upgrade completed");
    Ok(Handshake::Accepted { stream, path })
}

/// Reads until the request head parses, then classifies it.
///
/// The returned bytes are everything read so far, which may include bytes
/// past the head.
async fn read_head<S>(stream: &mut S) -> Result<(Bytes, Request)>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(1024);

    loop {
        if stream.read_buf(&mut buffer).await? == 0 {
            return Err(Error::protocol("Stream ended before request head"));
        }

        if let Some(request) = classify(&buffer) {
            return Ok((buffer.freeze(), request));
        }

        if buffer.len() >= MAX_HEAD_SIZE {
            return Err(Error::protocol(format!(
                "Request head exceeds {MAX_HEAD_SIZE} bytes"
            )));
        }
    }
}

async fn reject<S>(mut stream: S, status: StatusCode) -> Result<Handshake<S>>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;

    Ok(Handshake::Rejected(status))
}

// ============================================================================
// Classification
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Request {
    Upgrade { path: String },
    Plain,
}

/// Classifies a request head.
///
/// Returns `None` while the head is incomplete. An upgrade is a `GET`
/// carrying `Connection: upgrade`, `Upgrade: websocket` and a
/// `Sec-WebSocket-Key`. Everything else, including unparsable heads, is
/// plain.
fn classify(head: &[u8]) -> Option<Request> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    match request.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return None,
        Err(e) => {
            trace!(error = %e, "Unparsable request head");
            return Some(Request::Plain);
        }
    }

    let (Some(method), Some(target)) = (request.method, request.path) else {
        return Some(Request::Plain);
    };

    let mut connection_upgrade = false;
    let mut upgrade_websocket = false;
    let mut has_key = false;

    // Values are raw bytes: obs-text is legal there and must not fail the
    // request.
    for header in request.headers.iter() {
        if header.name.eq_ignore_ascii_case("connection") {
            connection_upgrade |= has_token(header.value, b"upgrade");
        } else if header.name.eq_ignore_ascii_case("upgrade") {
            upgrade_websocket |= has_token(header.value, b"websocket");
        } else if header.name.eq_ignore_ascii_case("sec-websocket-key") {
            has_key |= !header.value.trim_ascii().is_empty();
        }
    }

    let request = if method == "GET" && connection_upgrade && upgrade_websocket && has_key {
        Request::Upgrade {
            path: target.to_string(),
        }
    } else {
        Request::Plain
    };

    Some(request)
}

fn has_token(value: &[u8], token: &[u8]) -> bool {
    value
        .split(|b| *b == b',')
        .any(|t| t.trim_ascii().eq_ignore_ascii_case(token))
}

// ============================================================================
// Rewind
// ============================================================================

/// Stream that replays already-read bytes before reading from `inner`.
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    /// Wraps `inner`, replaying `prefix` first.
    #[must_use]
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Returns the wrapped stream.
    #[inline]
    #[must_use]
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================
