//! wsserve - Embeddable WebSocket server core.
//!
//! Accepts WebSocket upgrades, tracks every live stream, reassembles
//! fragmented frames into whole messages and sends large messages as
//! bounded, cancellable chunks.
//!
//! # Architecture
//!
//! ```text
//! Server (accept loop)
//!   ├─ handshake: 400 / 404 for non-upgrade requests
//!   ├─ Registry: live sessions, closed atomically at shutdown
//!   └─ Session (one task per connection)
//!        ├─ receive pump: chunks → MessageAssembler → handlers
//!        └─ send path: message → chunks ≤ max_chunk_size → transport
//! ```
//!
//! Key design principles:
//!
//! - One pump per connection; occurrences of one session are dispatched in order
//! - Handlers form one ordered list: the primary handler first, then subscribers
//! - Sends on one session are serialized; chunks of two messages never interleave
//! - A single shutdown token reaches every pump through child tokens
//!
//! # Quick Start
//!
//! ```no_run
//! use wsserve::{Result, Server, ServerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::new(ServerOptions::new().with_port(9001));
//!
//!     server.on_connect(|session| {
//!         session.on_message(|session, message| {
//!             let session = session.clone();
//!             let (kind, data) = (message.kind(), message.clone().into_data());
//!             tokio::spawn(async move { session.send(data, kind).await });
//!         });
//!     });
//!
//!     let addr = server.start().await?;
//!     println!("Listening on {addr}");
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`handler`] | Handler traits for session and server occurrences |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`options`] | Server configuration |
//! | [`protocol`] | Messages, chunks and close statuses |
//! | [`server`] | Accept loop and session registry |
//! | [`session`] | Per-connection pump, send path and reassembly |
//! | [`transport`] | Chunked transport over `tokio-tungstenite` |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Handler traits.
///
/// Implement [`SessionHandler`] or [`ServerHandler`], or subscribe closures.
pub mod handler;

/// Type-safe identifiers.
pub mod identifiers;

/// Server configuration.
pub mod options;

/// Message-level protocol types.
pub mod protocol;

/// Accept loop and session registry.
pub mod server;

/// Per-connection sessions.
pub mod session;

/// Chunked transport layer.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Handler traits
pub use handler::{ServerHandler, SessionHandler};

// Identifier types
pub use identifiers::SessionId;

// Configuration
pub use options::ServerOptions;

// Protocol types
pub use protocol::{Chunk, CloseStatus, Message, MessageType, TransportEvent};

// Server and sessions
pub use server::Server;
pub use session::{Session, SessionState};
