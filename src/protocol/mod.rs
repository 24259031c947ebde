//! Message-level protocol types.
//!
//! These types sit between the transport primitive and the application:
//! the transport yields [`TransportEvent`]s, the session assembler folds
//! them into [`Message`]s, and both sides speak [`CloseStatus`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `close` | Close status vocabulary |
//! | `event` | Chunk and close events produced by a transport |
//! | `message` | Fully assembled application messages |

// ============================================================================
// Submodules
// ============================================================================

/// Close status codes.
pub mod close;

/// Transport events.
pub mod event;

/// Assembled application messages.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use close::CloseStatus;
pub use event::{Chunk, TransportEvent};
pub use message::{Message, MessageType};
