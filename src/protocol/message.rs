//! Assembled application messages.
//!
//! A [`Message`] is one complete logical message, however many chunks it
//! arrived in. Its type is fixed at creation: a text message is only ever
//! exposed as `&str`, a binary message only as `&[u8]`.
//!
//! Handlers receive `&Message` for the duration of one call. Keeping the
//! payload beyond that call requires [`Message::to_vec`] or a clone.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::Bytes;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::error::{Error, Result};

// ============================================================================
// MessageType
// ============================================================================

/// Data type of a message or chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Raw bytes.
    Binary,
    /// UTF-8 text.
    Text,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Text => f.write_str("text"),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An immutable, fully reassembled message.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    payload: Payload,
}

/// Text is validated once, when the message is built.
#[derive(Clone, PartialEq, Eq)]
enum Payload {
    Binary(Bytes),
    Text(Utf8Bytes),
}

impl Message {
    /// Builds a message from a reassembled payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUtf8`] if `kind` is text and `data` is not
    /// UTF-8.
    pub(crate) fn from_parts(kind: MessageType, data: Bytes) -> Result<Self> {
        let payload = match kind {
            MessageType::Binary => Payload::Binary(data),
            MessageType::Text => Payload::Text(Utf8Bytes::try_from(data)?),
        };
        Ok(Self { payload })
    }

    /// Creates a binary message.
    #[must_use]
    pub fn from_binary(data: impl Into<Bytes>) -> Self {
        Self {
            payload: Payload::Binary(data.into()),
        }
    }

    /// Creates a text message.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Text(Utf8Bytes::from(text.into())),
        }
    }

    /// Returns the message type.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        match self.payload {
            Payload::Binary(_) => MessageType::Binary,
            Payload::Text(_) => MessageType::Text,
        }
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Returns the payload of a binary message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongMessageType`] if this is a text message.
    pub fn binary(&self) -> Result<&[u8]> {
        self.as_binary()
            .ok_or_else(|| Error::wrong_message_type(MessageType::Binary, self.kind()))
    }

    /// Returns the payload of a text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongMessageType`] if this is a binary message.
    pub fn text(&self) -> Result<&str> {
        self.as_text()
            .ok_or_else(|| Error::wrong_message_type(MessageType::Text, self.kind()))
    }

    /// Returns the payload if this is a binary message.
    #[inline]
    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Binary(data) => Some(&data[..]),
            Payload::Text(_) => None,
        }
    }

    /// Returns the payload if this is a text message.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text.as_str()),
            Payload::Binary(_) => None,
        }
    }

    /// Copies the payload into an owned vector.
    #[inline]
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Consumes the message and returns the payload.
    #[inline]
    #[must_use]
    pub fn into_data(self) -> Bytes {
        match self.payload {
            Payload::Binary(data) => data,
            Payload::Text(text) => text.into(),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Binary(data) => &data[..],
            Payload::Text(text) => text.as_bytes(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
