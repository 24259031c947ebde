//! Server configuration.
//!
//! [`ServerOptions`] is immutable once handed to a [`Server`](crate::Server).
//! The listener consumes it directly and propagates the chunk size and
//! timeouts to every session it creates.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wsserve::ServerOptions;
//!
//! let options = ServerOptions::new()
//!     .with_host("0.0.0.0")
//!     .with_port(9000)
//!     .with_path("/ws")
//!     .with_max_chunk_size(4096)
//!     .with_keep_alive_interval(Some(Duration::from_secs(15)));
//!
//! options.validate()?;
//! ```
//!
//! Options can also be loaded from JSON; durations are given in
//! milliseconds and missing fields keep their defaults:
//!
//! ```json
//! { "host": "0.0.0.0", "port": 9000, "keep_alive_interval_ms": 15000 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default bind host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default upgrade path.
pub const DEFAULT_PATH: &str = "/";

/// Default maximum chunk size in bytes.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16385;

/// Default keep-alive ping interval.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default cap on one reassembled message (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;

/// Default time allowed for a client to send its upgrade request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for the peer to answer a close frame.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ServerOptions
// ============================================================================

/// Listener and per-session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Bind address (host name or IP).
    pub host: String,

    /// Bind port. `0` lets the OS pick one.
    pub port: u16,

    /// Upgrade path prefix accepted by the listener.
    pub path: String,

    /// Largest chunk handed to or taken from the transport, in bytes.
    pub max_chunk_size: usize,

    /// Interval between keep-alive pings; `None` disables them.
    #[serde(rename = "keep_alive_interval_ms", with = "millis::option")]
    pub keep_alive_interval: Option<Duration>,

    /// Largest reassembled message accepted, in bytes.
    pub max_message_size: usize,

    /// Deadline for receiving the upgrade request head.
    #[serde(rename = "handshake_timeout_ms", with = "millis")]
    pub handshake_timeout: Duration,

    /// Deadline for the peer to complete a close handshake we started.
    #[serde(rename = "close_timeout_ms", with = "millis")]
    pub close_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            keep_alive_interval: Some(DEFAULT_KEEP_ALIVE_INTERVAL),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ServerOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON document.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is malformed
    /// - [`Error::Config`] if the resulting options are invalid
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a JSON file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Json`] / [`Error::Config`] as for [`Self::from_json_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ServerOptions {
    /// Sets the bind host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the bind port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the upgrade path prefix.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the maximum chunk size.
    #[inline]
    #[must_use]
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    /// Sets the keep-alive interval (`None` disables pings).
    #[inline]
    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the maximum reassembled message size.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the close handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

// ============================================================================
// Validation & Accessors
// ============================================================================

impl ServerOptions {
    /// Checks the options for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if !self.path.starts_with('/') {
            return Err(Error::config(format!(
                "path must start with '/', got {:?}",
                self.path
            )));
        }
        if self.max_chunk_size == 0 {
            return Err(Error::config("max_chunk_size must be greater than 0"));
        }
        if self.max_message_size == 0 {
            return Err(Error::config("max_message_size must be greater than 0"));
        }
        if self.keep_alive_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::config(
                "keep_alive_interval must be greater than 0 (use None to disable)",
            ));
        }
        if self.handshake_timeout.is_zero() || self.close_timeout.is_zero() {
            return Err(Error::config("timeouts must be greater than 0"));
        }
        Ok(())
    }

    /// Returns the `host:port` string passed to the socket bind.
    #[inline]
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the WebSocket URL clients should connect to.
    ///
    /// Format: `ws://{host}:{port}{path}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }

    /// Returns `true` if `request_path` falls under the configured prefix.
    ///
    /// The query string, if any, is ignored.
    #[must_use]
    pub fn matches_path(&self, request_path: &str) -> bool {
        let request_path = request_path.split('?').next().unwrap_or_default();
        let prefix = self.path.trim_end_matches('/');

        if prefix.is_empty() {
            return request_path.starts_with('/');
        }

        match request_path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

// ============================================================================
// Duration (de)serialization
// ============================================================================

/// Serializes durations as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
