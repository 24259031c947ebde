//! Error types for wsserve.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wsserve::{Result, Session};
//!
//! async fn greet(session: &Session) -> Result<()> {
//!     session.send_text("hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Surfaced via |
//! |----------|----------|--------------|
//! | Argument | [`Error::Config`], [`Error::InvalidArgument`] | caller |
//! | State | [`Error::InvalidState`], [`Error::WrongMessageType`], [`Error::Lifecycle`] | caller |
//! | Transport | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Protocol`], [`Error::InvalidUtf8`], [`Error::MessageTooBig`], [`Error::Timeout`] | caller or `on_error` |
//! | External | [`Error::Io`], [`Error::WebSocket`], [`Error::Json`] | caller or `on_error` |
//! | Cancellation | [`Error::Cancelled`] | caller only |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::str::Utf8Error;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::protocol::MessageType;
use crate::session::SessionState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Argument Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when [`ServerOptions`](crate::ServerOptions) fail validation
    /// or cannot be loaded.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to an operation.
    ///
    /// Reported before any I/O is attempted.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // State Errors
    // ========================================================================
    /// Operation attempted on a session in the wrong state.
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// State the session was in.
        state: SessionState,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// Message accessed as the wrong type.
    #[error("Expected {expected} message, got {actual}")]
    WrongMessageType {
        /// Type the caller asked for.
        expected: MessageType,
        /// Type the message carries.
        actual: MessageType,
    },

    /// Server lifecycle misuse (start twice, start after stop).
    #[error("Server lifecycle error: {message}")]
    Lifecycle {
        /// Description of the lifecycle violation.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Connection-level failure.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The underlying stream ended without a close handshake.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol violation detected while reassembling messages.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// A text message carried invalid UTF-8.
    #[error("Invalid UTF-8 in text message: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    /// An incoming message grew past the configured limit.
    #[error("Message of at least {size} bytes exceeds limit of {limit} bytes")]
    MessageTooBig {
        /// Bytes accumulated when the limit was hit.
        size: usize,
        /// Configured maximum message size.
        limit: usize,
    },

    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Cancellation
    // ========================================================================
    /// The operation was aborted by the shutdown signal.
    ///
    /// Not an error condition for the session; never dispatched to handlers.
    #[error("Operation cancelled")]
    Cancelled,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON deserialization error (options loading).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(state: SessionState, operation: &'static str) -> Self {
        Self::InvalidState { state, operation }
    }

    /// Creates a wrong message type error.
    #[inline]
    pub fn wrong_message_type(expected: MessageType, actual: MessageType) -> Self {
        Self::WrongMessageType { expected, actual }
    }

    /// Creates a lifecycle error.
    #[inline]
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a message too big error.
    #[inline]
    pub fn message_too_big(size: usize, limit: usize) -> Self {
        Self::MessageTooBig { size, limit }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from the shutdown signal.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if the caller supplied a bad argument or configuration.
    #[inline]
    #[must_use]
    pub fn is_argument_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidArgument { .. })
    }

    /// Returns `true` if the operation was refused because of session or
    /// server state.
    #[inline]
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. } | Self::WrongMessageType { .. } | Self::Lifecycle { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_) | Self::Io(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
