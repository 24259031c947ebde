//! Chunked transport layer.
//!
//! Sessions never touch sockets directly. They read [`TransportEvent`]s
//! from a [`ChunkReader`] and write chunks through a [`ChunkWriter`]; the
//! production pair wraps a `tokio-tungstenite` stream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   TCP    ┌─────────────┐   WebSocket   ┌───────────────────┐
//! │ TcpListener  │─────────►│  handshake  │──────────────►│ WebSocketReader   │──► Session pump
//! │              │          │  400 / 404  │               │ WebSocketWriter   │◄── Session::send
//! └──────────────┘          └─────────────┘               └───────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handshake` | Request classification and WebSocket upgrade |
//! | `websocket` | Chunk reader and writer over `tokio-tungstenite` |

// ============================================================================
// Submodules
// ============================================================================

/// Upgrade request classification and acceptance.
pub mod handshake;

/// Chunk reader and writer over a WebSocket stream.
pub mod websocket;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::protocol::{CloseStatus, MessageType, TransportEvent};

// ============================================================================
// Re-exports
// ============================================================================

pub use handshake::{Handshake, Rewind, accept};
pub use websocket::{WebSocketReader, WebSocketWriter, split};

// ============================================================================
// ChunkReader
// ============================================================================

/// Receiving half of a chunked transport.
#[async_trait]
pub trait ChunkReader: Send {
    /// Waits for the next chunk or the peer's close signal.
    ///
    /// Must be cancel-safe: dropping the future before it completes must
    /// not lose data.
    ///
    /// # Errors
    ///
    /// Any transport failure. [`Error::ConnectionClosed`](crate::Error::ConnectionClosed)
    /// when the stream ends without a close signal.
    async fn receive(&mut self) -> Result<TransportEvent>;
}

// ============================================================================
// ChunkWriter
// ============================================================================

/// Sending half of a chunked transport.
#[async_trait]
pub trait ChunkWriter: Send {
    /// Sends one chunk of a logical message.
    ///
    /// The first chunk after a chunk with `end_of_message` set starts a new
    /// message of type `kind`.
    async fn send_chunk(
        &mut self,
        kind: MessageType,
        payload: Bytes,
        end_of_message: bool,
    ) -> Result<()>;

    /// Sends a keep-alive probe.
    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    /// Sends the close frame.
    async fn close(&mut self, status: CloseStatus, reason: Option<&str>) -> Result<()>;

    /// Flushes pending output and releases the underlying stream.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
