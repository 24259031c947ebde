//! Live session registry.
//!
//! The only state shared between pumps: the accept path adds, the
//! finishing pump removes, shutdown sweeps. One lock guards all three and
//! is never held across I/O.
//!
//! # Shutdown
//!
//! ```text
//! close_all(status)
//!   ├─ lock → closed = true, drain members → unlock
//!   └─ close every drained session concurrently, outside the lock
//! ```
//!
//! Because `add` checks `closed` under the same lock, no session can slip in
//! after the sweep has taken its snapshot.

// ============================================================================
// Imports
// ============================================================================

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::identifiers::SessionId;
use crate::protocol::CloseStatus;
use crate::session::Session;

// ============================================================================
// Registry
// ============================================================================

/// Mutually exclusive set of live sessions.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Members>,
}

#[derive(Debug, Default)]
struct Members {
    sessions: FxHashMap<SessionId, Session>,
    closed: bool,
}

impl Registry {
    /// Creates an empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session.
    ///
    /// Returns `false`, leaving the registry unchanged, once
    /// [`close_all`](Self::close_all) has started.
    pub fn add(&self, session: &Session) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.sessions.insert(session.id(), session.clone());
        true
    }

    /// Removes a session. Idempotent.
    ///
    /// Returns `true` if the session was present.
    pub fn remove(&self, id: SessionId) -> bool {
        self.inner.lock().sessions.remove(&id).is_some()
    }

    /// Returns a session by ID.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Returns `true` if no session is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }

    /// Returns `true` once shutdown has started.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Returns a copy of the current member set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Session> {
        self.inner.lock().sessions.values().cloned().collect()
    }

    /// Marks the registry closed and closes every member.
    ///
    /// Returns the number of sessions swept. Every one of them is `Closed`
    /// when this returns.
    pub async fn close_all(&self, status: CloseStatus) -> usize {
        let drained: Vec<Session> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.sessions.drain().map(|(_, session)| session).collect()
        };

        let count = drained.len();
        debug!(count, %status, "Closing all sessions");

        join_all(drained.iter().map(|session| async move {
            if let Err(e) = session.close(status, None).await {
                warn!(session_id = %session.id(), error = %e, "Session close failed");
            }
            // Sessions that were not open skip the handshake; wait for their
            // pumps to finish instead.
            session.closed().await;
        }))
        .await;

        count
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use crate::options::ServerOptions;
    use crate::session::SessionState;
    use crate::testing::MemoryTransport;

    fn options() -> ServerOptions {
        ServerOptions::new()
            .with_keep_alive_interval(None)
            .with_close_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let registry = Registry::new();
        let transport = MemoryTransport::new();
        let session = transport.session(&options());

        assert!(registry.add(&session));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(session.id()).is_some());

        assert!(registry.remove(session.id()));
        assert!(!registry.remove(session.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_closes_members_and_blocks_add() {
        let registry = Registry::new();
        let mut transports = Vec::new();
        let mut pumps = Vec::new();

        for _ in 0..3 {
            let mut transport = MemoryTransport::new();
            let session = transport.session(&options());
            session.mark_open();
            assert!(registry.add(&session));

            let reader = transport.take_reader();
            let pumped = session.clone();
            pumps.push(tokio::spawn(async move { pumped.run(reader).await }));
            transports.push((transport, session));
        }

        assert_eq!(registry.close_all(CloseStatus::GoingAway).await, 3);

        for (_, session) in &transports {
            assert_eq!(session.state(), SessionState::Closed);
        }
        assert!(registry.is_empty());
        assert!(registry.is_closed());

        let late = MemoryTransport::new().session(&options());
        assert!(!registry.add(&late));
        assert!(registry.is_empty());

        for pump in pumps {
            pump.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_close_all_forces_unresponsive_sessions() {
        let registry = Registry::new();
        let transport = MemoryTransport::silent();
        let session = transport.session(&options());
        session.mark_open();
        registry.add(&session);

        assert_eq!(registry.close_all(CloseStatus::Normal).await, 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_add_while_close_all_is_pending_is_refused() {
        let registry = Arc::new(Registry::new());
        let transport = MemoryTransport::silent();
        let options = options().with_close_timeout(Duration::from_secs(1));
        let session = transport.session(&options);
        session.mark_open();
        assert!(registry.add(&session));

        let sweeping = Arc::clone(&registry);
        let sweep = tokio::spawn(async move { sweeping.close_all(CloseStatus::GoingAway).await });

        // The silent peer keeps the sweep waiting in the close handshake.
        while session.state() != SessionState::Closing {
            tokio::task::yield_now().await;
        }

        let adding = Arc::clone(&registry);
        let late = MemoryTransport::new().session(&options);
        let added = tokio::spawn(async move { adding.add(&late) }).await.unwrap();

        assert!(!added);
        assert!(registry.is_empty());
        assert!(!sweep.is_finished());

        assert_eq!(sweep.await.unwrap(), 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.is_empty());
    }
}
