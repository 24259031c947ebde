//! Transport events.
//!
//! One call to [`ChunkReader::receive`](crate::transport::ChunkReader::receive)
//! produces one [`TransportEvent`]: either a piece of a data message or the
//! peer's close signal. Chunks of one logical message share a type and only
//! the last carries `end_of_message`.

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;

use super::close::CloseStatus;
use super::message::MessageType;

// ============================================================================
// Chunk
// ============================================================================

/// One wire-level piece of a logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Data type declared for the message this chunk belongs to.
    pub kind: MessageType,

    /// Payload bytes, possibly empty.
    pub payload: Bytes,

    /// Whether this chunk completes the current message.
    pub end_of_message: bool,
}

impl Chunk {
    /// Creates a chunk.
    #[inline]
    #[must_use]
    pub fn new(kind: MessageType, payload: impl Into<Bytes>, end_of_message: bool) -> Self {
        Self {
            kind,
            payload: payload.into(),
            end_of_message,
        }
    }

    /// Creates the final chunk of a message.
    #[inline]
    #[must_use]
    pub fn last(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self::new(kind, payload, true)
    }

    /// Creates a non-final chunk of a message.
    #[inline]
    #[must_use]
    pub fn partial(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self::new(kind, payload, false)
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Result of one receive call on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A piece of a data message.
    Chunk(Chunk),

    /// The peer sent its close frame.
    Close(CloseStatus),
}

impl From<Chunk> for TransportEvent {
    fn from(chunk: Chunk) -> Self {
        Self::Chunk(chunk)
    }
}
