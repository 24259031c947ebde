//! Close status vocabulary.
//!
//! Passed through verbatim between the transport and handlers.
//!
//! | Status | Code |
//! |--------|------|
//! | `Normal` | 1000 |
//! | `GoingAway` | 1001 |
//! | `ProtocolError` | 1002 |
//! | `UnsupportedData` | 1003 |
//! | `Empty` | none (1005 on the wire) |
//! | `InvalidPayload` | 1007 |
//! | `PolicyViolation` | 1008 |
//! | `MessageTooBig` | 1009 |
//! | `MandatoryExtension` | 1010 |
//! | `InternalError` | 1011 |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

// ============================================================================
// CloseStatus
// ============================================================================

/// Reason code carried by a close handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseStatus {
    /// Normal closure.
    Normal,
    /// Endpoint is going away (server shutdown, page navigation).
    GoingAway,
    /// Protocol violation.
    ProtocolError,
    /// Received a data type the endpoint cannot accept.
    UnsupportedData,
    /// No status code was present.
    Empty,
    /// Payload inconsistent with its type (e.g. invalid UTF-8 text).
    InvalidPayload,
    /// Generic policy violation.
    PolicyViolation,
    /// Message too big to process.
    MessageTooBig,
    /// Client expected an extension the server did not negotiate.
    MandatoryExtension,
    /// Unexpected condition on the server.
    InternalError,
    /// Any other code.
    Other(u16),
}

impl CloseStatus {
    /// Returns the numeric close code, or `None` for [`CloseStatus::Empty`].
    #[must_use]
    pub const fn code(self) -> Option<u16> {
        match self {
            Self::Normal => Some(1000),
            Self::GoingAway => Some(1001),
            Self::ProtocolError => Some(1002),
            Self::UnsupportedData => Some(1003),
            Self::Empty => None,
            Self::InvalidPayload => Some(1007),
            Self::PolicyViolation => Some(1008),
            Self::MessageTooBig => Some(1009),
            Self::MandatoryExtension => Some(1010),
            Self::InternalError => Some(1011),
            Self::Other(code) => Some(code),
        }
    }

    /// Returns `true` for statuses that indicate a clean shutdown.
    #[inline]
    #[must_use]
    pub const fn is_clean(self) -> bool {
        matches!(self, Self::Normal | Self::GoingAway | Self::Empty)
    }
}

impl From<u16> for CloseStatus {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1005 => Self::Empty,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::InternalError,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for CloseStatus {
    fn from(code: CloseCode) -> Self {
        Self::from(u16::from(code))
    }
}

impl From<CloseStatus> for CloseCode {
    fn from(status: CloseStatus) -> Self {
        CloseCode::from(status.code().unwrap_or(1005))
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.code()) {
            (Self::Other(code), _) => write!(f, "Other({code})"),
            (_, Some(code)) => write!(f, "{self:?}({code})"),
            (_, None) => f.write_str("Empty"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(CloseStatus::from(1000), CloseStatus::Normal);
        assert_eq!(CloseStatus::from(1011), CloseStatus::InternalError);
        assert_eq!(CloseStatus::from(1005), CloseStatus::Empty);
        assert_eq!(CloseStatus::from(4000), CloseStatus::Other(4000));
    }

    #[test]
    fn test_tungstenite_conversion() {
        assert_eq!(CloseStatus::from(CloseCode::Normal), CloseStatus::Normal);
        assert_eq!(CloseStatus::from(CloseCode::Away), CloseStatus::GoingAway);
        assert_eq!(CloseStatus::from(CloseCode::Error), CloseStatus::InternalError);
        assert_eq!(CloseCode::from(CloseStatus::ProtocolError), CloseCode::Protocol);
        assert_eq!(CloseCode::from(CloseStatus::MessageTooBig), CloseCode::Size);
    }

    #[test]
    fn test_display() {
        assert_eq!(CloseStatus::Normal.to_string(), "Normal(1000)");
        assert_eq!(CloseStatus::Empty.to_string(), "Empty");
        assert_eq!(CloseStatus::Other(4001).to_string(), "Other(4001)");
    }

    #[test]
    fn test_is_clean() {
        assert!(CloseStatus::Normal.is_clean());
        assert!(!CloseStatus::InternalError.is_clean());
    }
}
