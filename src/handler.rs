//! Event dispatch surfaces.
//!
//! Sessions and the server each keep one ordered list of handlers. The
//! primary handler (set with `with_handler`) always runs first, then every
//! subscriber in subscription order. Closures registered with `on_*`
//! helpers are ordinary subscribers.
//!
//! Dispatch is synchronous with respect to the pump that produced the
//! occurrence: the pump waits for every handler to return before it reads
//! again, so occurrences of one session never overlap.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Error;
use crate::protocol::{CloseStatus, Message};
use crate::session::Session;

// ============================================================================
// Handler Traits
// ============================================================================

/// Receives the occurrences of one session.
///
/// Every method has an empty default so implementors override only what
/// they need. `message` is borrowed for the duration of the call; clone it
/// to keep it.
pub trait SessionHandler: Send + Sync {
    /// A complete message arrived.
    fn on_message(&self, _session: &Session, _message: &Message) {}

    /// The session closed, either by the peer or after a failure.
    fn on_close(&self, _session: &Session, _status: CloseStatus) {}

    /// The session's stream failed. Followed by `on_close`.
    fn on_error(&self, _session: &Session, _error: &Error) {}
}

/// Receives server-level occurrences.
pub trait ServerHandler: Send + Sync {
    /// A session completed its upgrade and is about to start receiving.
    ///
    /// Handlers subscribed to `session` here see every one of its messages.
    fn on_connect(&self, _session: &Session) {}

    /// The accept loop failed and stopped.
    fn on_error(&self, _error: &Error) {}
}

// ============================================================================
// HandlerList
// ============================================================================

/// Ordered handler registry: primary first, then subscribers.
pub(crate) struct HandlerList<H: ?Sized> {
    inner: RwLock<Handlers<H>>,
}

struct Handlers<H: ?Sized> {
    primary: Option<Arc<H>>,
    subscribers: Vec<Arc<H>>,
}

impl<H: ?Sized> HandlerList<H> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Handlers {
                primary: None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Replaces the primary handler.
    pub(crate) fn set_primary(&self, handler: Arc<H>) {
        self.inner.write().primary = Some(handler);
    }

    /// Appends a subscriber.
    pub(crate) fn subscribe(&self, handler: Arc<H>) {
        self.inner.write().subscribers.push(handler);
    }

    /// Returns the handlers in dispatch order.
    ///
    /// The lock is released before any handler runs, so handlers may
    /// subscribe further handlers without deadlocking.
    pub(crate) fn snapshot(&self) -> Vec<Arc<H>> {
        let inner = self.inner.read();
        inner
            .primary
            .iter()
            .chain(inner.subscribers.iter())
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        let inner = self.inner.read();
        usize::from(inner.primary.is_some()) + inner.subscribers.len()
    }
}

// ============================================================================
// Closure Adapters
// ============================================================================

pub(crate) struct MessageFn<F>(pub(crate) F);

impl<F> SessionHandler for MessageFn<F>
where
    F: Fn(&Session, &Message) + Send + Sync,
{
    fn on_message(&self, session: &Session, message: &Message) {
        (self.0)(session, message);
    }
}

pub(crate) struct CloseFn<F>(pub(crate) F);

impl<F> SessionHandler for CloseFn<F>
where
    F: Fn(&Session, CloseStatus) + Send + Sync,
{
    fn on_close(&self, session: &Session, status: CloseStatus) {
        (self.0)(session, status);
    }
}

pub(crate) struct SessionErrorFn<F>(pub(crate) F);

impl<F> SessionHandler for SessionErrorFn<F>
where
    F: Fn(&Session, &Error) + Send + Sync,
{
    fn on_error(&self, session: &Session, error: &Error) {
        (self.0)(session, error);
    }
}

pub(crate) struct ConnectFn<F>(pub(crate) F);

impl<F> ServerHandler for ConnectFn<F>
where
    F: Fn(&Session) + Send + Sync,
{
    fn on_connect(&self, session: &Session) {
        (self.0)(session);
    }
}

pub(crate) struct ServerErrorFn<F>(pub(crate) F);

impl<F> ServerHandler for ServerErrorFn<F>
where
    F: Fn(&Error) + Send + Sync,
{
    fn on_error(&self, error: &Error) {
        (self.0)(error);
    }
}

// ============================================================================
// Tests
// ============================================================================
