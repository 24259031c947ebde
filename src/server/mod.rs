//! Listener and session registry.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `listener` | Accept loop and server lifecycle |
//! | `registry` | Live session set with coordinated shutdown |

// ============================================================================
// Submodules
// ============================================================================

/// Accept loop and server lifecycle.
pub mod listener;

/// Live session registry.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use listener::Server;
pub use registry::Registry;
