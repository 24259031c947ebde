//! Per-connection sessions.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `assembler` | Fragment reassembly state machine |
//! | `core` | Session handle, send path and receive pump |
//! | `state` | Lifecycle states |

// ============================================================================
// Submodules
// ============================================================================

/// Fragment reassembly.
pub mod assembler;

/// Session handle and receive pump.
pub mod core;

/// Lifecycle states.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use assembler::MessageAssembler;
pub use core::{PumpExit, Session};
pub use state::SessionState;
