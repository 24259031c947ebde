//! Session lifecycle states.

use std::fmt;

/// Lifecycle state of a [`Session`](super::Session).
///
/// States only ever move forward:
/// `Connecting → Open → Closing → Closed`. `Closing` may be skipped when
/// the peer closes first or the stream fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Upgrade accepted, session not yet handed to the application.
    Connecting,
    /// Messages may be sent and received.
    Open,
    /// We sent a close frame and are waiting for the peer's answer.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` once the session can no longer carry messages.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(SessionState::Connecting < SessionState::Open);
        assert!(SessionState::Open < SessionState::Closing);
        assert!(SessionState::Closing < SessionState::Closed);
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Closing.to_string(), "closing");
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Open.is_terminal());
    }
}
