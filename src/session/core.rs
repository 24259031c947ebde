//! Session handle, send path and receive pump.
//!
//! A [`Session`] is a cheap clonable handle. The accepting task owns the
//! receive half and drives [`Session::run`] until the stream ends; any
//! number of callers may send through the handle concurrently.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::pending;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::handler::{CloseFn, HandlerList, MessageFn, SessionErrorFn, SessionHandler};
use crate::identifiers::SessionId;
use crate::options::ServerOptions;
use crate::protocol::{CloseStatus, Message, MessageType, TransportEvent};
use crate::transport::{ChunkReader, ChunkWriter};

use super::assembler::MessageAssembler;
use super::state::SessionState;

// ============================================================================
// PumpExit
// ============================================================================

/// Why a receive pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The peer closed the stream.
    Closed(CloseStatus),
    /// The stream failed; the session was closed with this status.
    Failed(CloseStatus),
    /// The session's cancellation token fired.
    Cancelled,
}

// ============================================================================
// Session
// ============================================================================

/// One accepted WebSocket stream.
///
/// # Thread Safety
///
/// `Session` is `Send + Sync` and cheap to clone. Concurrent sends on the
/// same session are serialized: chunks of two messages never interleave.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    remote_addr: SocketAddr,
    path: String,
    max_chunk_size: usize,
    max_message_size: usize,
    keep_alive_interval: Option<Duration>,
    close_timeout: Duration,
    state: watch::Sender<SessionState>,
    /// Held for the full duration of one logical send. Emptied by teardown.
    writer: Mutex<Option<Box<dyn ChunkWriter>>>,
    handlers: HandlerList<dyn SessionHandler>,
    cancel: CancellationToken,
    close_dispatched: AtomicBool,
}

impl Session {
    /// Creates a session in the `Connecting` state.
    pub(crate) fn new(
        options: &ServerOptions,
        remote_addr: SocketAddr,
        path: impl Into<String>,
        writer: Box<dyn ChunkWriter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                remote_addr,
                path: path.into(),
                max_chunk_size: options.max_chunk_size.max(1),
                max_message_size: options.max_message_size,
                keep_alive_interval: options.keep_alive_interval,
                close_timeout: options.close_timeout,
                state: watch::Sender::new(SessionState::Connecting),
                writer: Mutex::new(Some(writer)),
                handlers: HandlerList::new(),
                cancel,
                close_dispatched: AtomicBool::new(false),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Returns the peer address.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Returns the request target the session was upgraded on.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Returns the largest chunk written per frame.
    #[inline]
    #[must_use]
    pub fn max_chunk_size(&self) -> usize {
        self.inner.max_chunk_size
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Returns `true` while messages can be sent.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Waits until the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        // Only fails if the sender is gone, which means the session is too.
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Sets the primary handler. It runs before every subscriber.
    pub fn set_handler(&self, handler: Arc<dyn SessionHandler>) {
        self.inner.handlers.set_primary(handler);
    }

    /// Adds a handler after all existing ones.
    pub fn subscribe(&self, handler: Arc<dyn SessionHandler>) {
        self.inner.handlers.subscribe(handler);
    }

    /// Subscribes a closure to complete messages.
    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(&Session, &Message) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(MessageFn(f)));
    }

    /// Subscribes a closure to the close notification.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn(&Session, CloseStatus) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(CloseFn(f)));
    }

    /// Subscribes a closure to stream failures.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&Session, &Error) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(SessionErrorFn(f)));
    }

    // ========================================================================
    // Send Path
    // ========================================================================

    /// Sends one logical message, split into chunks of at most
    /// [`max_chunk_size`](Self::max_chunk_size) bytes.
    ///
    /// Only the last chunk carries the end-of-message flag. A send that
    /// fails part-way may leave the peer with a truncated message and must
    /// not be retried from the middle.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `data` is empty (no I/O is attempted)
    /// - [`Error::InvalidState`] if the session is not open
    /// - [`Error::Cancelled`] if the session is cancelled before or during the send
    /// - Any transport error from the writer
    pub async fn send(&self, data: impl Into<Bytes>, kind: MessageType) -> Result<()> {
        let data = data.into();
        if data.is_empty() {
            return Err(Error::invalid_argument("Cannot send an empty message"));
        }
        self.ensure_open("send")?;

        let cancel = &self.inner.cancel;
        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.inner.writer.lock() => guard,
        };

        // The session may have closed while this send waited its turn.
        self.ensure_open("send")?;
        let Some(writer) = guard.as_mut() else {
            return Err(Error::invalid_state(self.state(), "send"));
        };

        let total = data.len();
        let chunk_size = self.inner.max_chunk_size;
        let mut offset = 0;
        let mut chunks = 0usize;

        while offset < total {
            let end = total.min(offset + chunk_size);
            let last = end == total;
            let payload = data.slice(offset..end);

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(session_id = %self.id(), sent = offset, total, "Send cancelled");
                    return Err(Error::Cancelled);
                }
                result = writer.send_chunk(kind, payload, last) => result?,
            }

            offset = end;
            chunks += 1;
        }

        trace!(session_id = %self.id(), %kind, bytes = total, chunks, "Message sent");
        Ok(())
    }

    /// Sends a binary message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    #[inline]
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(data, MessageType::Binary).await
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    #[inline]
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Bytes::from(text.into()), MessageType::Text).await
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Starts the close handshake and waits for it to finish.
    ///
    /// A no-op unless the session is open, so calling it twice is safe.
    /// If the peer does not answer within the configured close timeout the
    /// session is forced to `Closed` and its pump cancelled.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the close frame could not be written.
    /// The session is `Closed` afterwards either way.
    pub async fn close(&self, status: CloseStatus, reason: Option<&str>) -> Result<()> {
        if !self.transition(SessionState::Open, SessionState::Closing) {
            trace!(session_id = %self.id(), state = %self.state(), "Close ignored");
            return Ok(());
        }

        debug!(session_id = %self.id(), %status, "Closing session");

        let handshake = async {
            if let Some(writer) = self.inner.writer.lock().await.as_mut() {
                writer.close(status, reason).await?;
            }
            self.closed().await;
            Ok::<_, Error>(())
        };

        let limit = self.inner.close_timeout;
        match timeout(limit, handshake).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(session_id = %self.id(), error = %e, "Failed to send close frame");
                self.force_closed();
                Err(e)
            }
            Err(_) => {
                warn!(
                    session_id = %self.id(),
                    timeout_ms = limit.as_millis() as u64,
                    "Peer did not answer close, forcing"
                );
                self.force_closed();
                Ok(())
            }
        }
    }

    // ========================================================================
    // Receive Pump
    // ========================================================================

    /// Drives the receive side until the stream closes, fails or the
    /// session is cancelled, then tears the session down.
    ///
    /// Each occurrence is dispatched to every handler before the next
    /// receive starts.
    pub(crate) async fn run<R: ChunkReader>(&self, mut reader: R) -> PumpExit {
        let mut assembler = MessageAssembler::new(self.inner.max_message_size);
        let mut keep_alive = self.inner.keep_alive_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let cancel = self.inner.cancel.clone();

        let exit = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break PumpExit::Cancelled,

                () = next_tick(&mut keep_alive) => self.keep_alive().await,

                event = reader.receive() => match event {
                    Ok(TransportEvent::Chunk(chunk)) => match assembler.push(chunk) {
                        Ok(Some(message)) => self.dispatch_message(&message),
                        Ok(None) => {}
                        Err(e) => {
                            let status = close_status_for(&e);
                            warn!(session_id = %self.id(), error = %e, "Rejecting inbound message");
                            self.dispatch_error(&e);
                            self.send_close_frame(status).await;
                            self.finish_with(status);
                            break PumpExit::Failed(status);
                        }
                    },

                    Ok(TransportEvent::Close(status)) => {
                        if assembler.reset() {
                            debug!(session_id = %self.id(), "Discarded partial message on close");
                        }
                        debug!(session_id = %self.id(), %status, "Peer closed session");
                        self.finish_with(status);
                        break PumpExit::Closed(status);
                    }

                    Err(e) => {
                        if cancel.is_cancelled() {
                            break PumpExit::Cancelled;
                        }
                        warn!(session_id = %self.id(), error = %e, "Session stream failed");
                        self.dispatch_error(&e);
                        self.finish_with(CloseStatus::InternalError);
                        break PumpExit::Failed(CloseStatus::InternalError);
                    }
                },
            }
        };

        if assembler.reset() {
            debug!(session_id = %self.id(), "Discarded partial message");
        }
        self.teardown().await;

        trace!(session_id = %self.id(), ?exit, "Receive pump exited");
        exit
    }

    /// Marks a freshly accepted session as open.
    pub(crate) fn mark_open(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Open)
    }

    /// Closes a session that never started its pump.
    pub(crate) async fn abort(&self, status: CloseStatus) {
        self.send_close_frame(status).await;
        self.teardown().await;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            SessionState::Open => Ok(()),
            state => Err(Error::invalid_state(state, operation)),
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Moves the state forward; never backward.
    fn advance(&self, next: SessionState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state < next {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn force_closed(&self) {
        self.advance(SessionState::Closed);
        self.inner.cancel.cancel();
    }

    /// Marks the session closed and notifies handlers once.
    fn finish_with(&self, status: CloseStatus) {
        self.advance(SessionState::Closed);
        self.dispatch_close(status);
    }

    async fn keep_alive(&self) {
        // A send in progress already proves the stream is alive.
        let Ok(mut guard) = self.inner.writer.try_lock() else {
            return;
        };
        let Some(writer) = guard.as_mut() else {
            return;
        };

        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => {}
            result = writer.ping() => {
                if let Err(e) = result {
                    debug!(session_id = %self.id(), error = %e, "Keep-alive ping failed");
                }
            }
        }
    }

    /// Best-effort close frame for a session that is going down.
    async fn send_close_frame(&self, status: CloseStatus) {
        self.advance(SessionState::Closing);

        let write = async {
            match self.inner.writer.lock().await.as_mut() {
                Some(writer) => writer.close(status, None).await,
                None => Ok(()),
            }
        };

        match timeout(self.inner.close_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session_id = %self.id(), error = %e, "Close frame not sent"),
            Err(_) => debug!(session_id = %self.id(), "Close frame timed out"),
        }
    }

    /// Releases the session's transport. Runs once per session, on pump exit;
    /// handles that outlive it only observe a closed session.
    async fn teardown(&self) {
        self.advance(SessionState::Closed);
        // Unblocks any send still holding the writer.
        self.inner.cancel.cancel();

        let Some(mut writer) = self.inner.writer.lock().await.take() else {
            return;
        };

        match timeout(self.inner.close_timeout, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(session_id = %self.id(), error = %e, "Writer shutdown failed"),
            Err(_) => debug!(session_id = %self.id(), "Writer shutdown timed out"),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch_message(&self, message: &Message) {
        trace!(
            session_id = %self.id(),
            kind = %message.kind(),
            bytes = message.len(),
            "Dispatching message"
        );
        for handler in self.inner.handlers.snapshot() {
            handler.on_message(self, message);
        }
    }

    fn dispatch_close(&self, status: CloseStatus) {
        if self.inner.close_dispatched.swap(true, Ordering::AcqRel) {
            return;
        }
        for handler in self.inner.handlers.snapshot() {
            handler.on_close(self, status);
        }
    }

    fn dispatch_error(&self, error: &Error) {
        for handler in self.inner.handlers.snapshot() {
            handler.on_error(self, error);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("path", &self.inner.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

/// Close status sent when an inbound message is rejected.
fn close_status_for(error: &Error) -> CloseStatus {
    match error {
        Error::MessageTooBig { .. } => CloseStatus::MessageTooBig,
        Error::InvalidUtf8(_) => CloseStatus::InvalidPayload,
        Error::Protocol { .. } => CloseStatus::ProtocolError,
        _ => CloseStatus::InternalError,
    }
}

// ============================================================================
// Tests
// ============================================================================
