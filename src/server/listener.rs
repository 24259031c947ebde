//! Accept loop and server lifecycle.
//!
//! # Connection Flow
//!
//! 1. `Server::start` binds and spawns the accept loop
//! 2. Each TCP connection gets its own task: handshake, then session
//! 3. Non-upgrade requests are answered `400` (wrong path `404`) and dropped
//! 4. Upgraded sessions are registered, announced via `on_connect`, then
//!    pumped until they close
//! 5. `Server::stop` closes every session, cancels the accept loop and
//!    waits for every task to finish

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::handler::{ConnectFn, HandlerList, ServerErrorFn, ServerHandler};
use crate::identifiers::SessionId;
use crate::options::ServerOptions;
use crate::protocol::CloseStatus;
use crate::session::Session;
use crate::transport::handshake::{self, Handshake};
use crate::transport::websocket;

use super::registry::Registry;

// ============================================================================
// Server
// ============================================================================

/// Embeddable WebSocket server.
///
/// Cheap to clone; clones share the same listener and sessions.
///
/// # Example
///
/// ```ignore
/// use wsserve::{Server, ServerOptions};
///
/// let server = Server::new(ServerOptions::new().with_port(0));
/// server.on_connect(|session| {
///     session.on_message(|session, message| {
///         tracing::info!(session_id = %session.id(), bytes = message.len(), "message");
///     });
/// });
///
/// let addr = server.start().await?;
/// // ...
/// server.stop().await;
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    options: ServerOptions,
    handlers: HandlerList<dyn ServerHandler>,
    registry: Registry,
    /// Parent of every session's token.
    shutdown: CancellationToken,
    /// Accept loop and per-connection tasks.
    tasks: TaskTracker,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

// ============================================================================
// Server - Constructor & Handlers
// ============================================================================

impl Server {
    /// Creates a stopped server.
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                options,
                handlers: HandlerList::new(),
                registry: Registry::new(),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                local_addr: Mutex::new(None),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Sets the primary handler. It runs before every subscriber.
    #[must_use]
    pub fn with_handler(self, handler: Arc<dyn ServerHandler>) -> Self {
        self.inner.handlers.set_primary(handler);
        self
    }

    /// Adds a handler after all existing ones.
    pub fn subscribe(&self, handler: Arc<dyn ServerHandler>) {
        self.inner.handlers.subscribe(handler);
    }

    /// Subscribes a closure to new sessions.
    pub fn on_connect<F>(&self, f: F)
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(ConnectFn(f)));
    }

    /// Subscribes a closure to accept loop failures.
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(ServerErrorFn(f)));
    }
}

// ============================================================================
// Server - Accessors
// ============================================================================

impl Server {
    /// Returns the options the server was built with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    /// Returns the bound address once started.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Returns the URL clients should connect to.
    ///
    /// Uses the bound address once started, the configured one before.
    #[must_use]
    pub fn ws_url(&self) -> String {
        match self.local_addr() {
            Some(addr) => format!("ws://{addr}{}", self.inner.options.path),
            None => self.inner.options.ws_url(),
        }
    }

    /// Returns `true` between a successful `start` and `stop`.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns the live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.registry.snapshot()
    }

    /// Returns a live session by ID.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.inner.registry.get(id)
    }
}

// ============================================================================
// Server - Lifecycle
// ============================================================================

impl Server {
    /// Binds the listener and starts accepting.
    ///
    /// Returns the bound address; port `0` picks a free port.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Lifecycle`] if the server is running or was stopped
    /// - [`Error::Io`] if binding fails
    pub async fn start(&self) -> Result<SocketAddr> {
        self.inner.options.validate()?;

        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::lifecycle("Server has been stopped"));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::lifecycle("Server is already running"));
        }

        let listener = match TcpListener::bind(self.inner.options.bind_addr()).await {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let addr = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(addr);

        info!(%addr, path = %self.inner.options.path, "WebSocket server listening");

        let server = self.clone();
        self.inner
            .tasks
            .spawn(async move { server.accept_loop(listener).await });

        Ok(addr)
    }

    /// Closes every session, stops accepting and waits for every task.
    ///
    /// Idempotent; later calls only wait.
    pub async fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            let count = self.inner.registry.close_all(CloseStatus::Normal).await;
            self.inner.shutdown.cancel();
            self.inner.tasks.close();
            debug!(sessions = count, "Server stopping");
        }

        self.inner.tasks.wait().await;
        info!("WebSocket server stopped");
    }
}

// ============================================================================
// Server - Accept Loop
// ============================================================================

impl Server {
    async fn accept_loop(self, listener: TcpListener) {
        let shutdown = self.inner.shutdown.clone();

        loop {
            let accepted = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("Accept loop cancelled");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    trace!(%addr, "TCP connection accepted");
                    let server = self.clone();
                    self.inner
                        .tasks
                        .spawn(async move { server.handle_connection(stream, addr).await });
                }
                Err(e) => {
                    let e = Error::from(e);
                    error!(error = %e, "Accept failed, no longer accepting");
                    self.dispatch_error(&e);
                    break;
                }
            }
        }
    }

    async fn handle_connection(self, stream: TcpStream, addr: SocketAddr) {
        let options = &self.inner.options;
        let shutdown = &self.inner.shutdown;

        let handshake = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            result = handshake::accept(stream, options) => result,
        };

        let (stream, path) = match handshake {
            Ok(Handshake::Accepted { stream, path }) => (stream, path),
            Ok(Handshake::Rejected(status)) => {
                debug!(%addr, %status, "Rejected request");
                return;
            }
            Err(e) => {
                warn!(%addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let (reader, writer) = websocket::split(stream, options.max_chunk_size);
        let session = Session::new(options, addr, path, Box::new(writer), shutdown.child_token());
        session.mark_open();

        if !self.inner.registry.add(&session) {
            debug!(session_id = %session.id(), %addr, "Server stopping, refusing session");
            session.abort(CloseStatus::GoingAway).await;
            return;
        }

        info!(session_id = %session.id(), %addr, path = session.path(), "Session connected");
        self.dispatch_connect(&session);

        let exit = session.run(reader).await;

        self.inner.registry.remove(session.id());
        info!(session_id = %session.id(), ?exit, "Session ended");
    }

    fn dispatch_connect(&self, session: &Session) {
        for handler in self.inner.handlers.snapshot() {
            handler.on_connect(session);
        }
    }

    fn dispatch_error(&self, error: &Error) {
        for handler in self.inner.handlers.snapshot() {
            handler.on_error(error);
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("running", &self.is_running())
            .field("sessions", &self.connection_count())
            .field("handlers", &self.inner.handlers.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::tungstenite::protocol::frame::Frame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};

    use crate::testing::init_tracing;

    const WAIT: Duration = Duration::from_secs(5);

    fn options() -> ServerOptions {
        ServerOptions::new()
            .with_host("127.0.0.1")
            .with_port(0)
            .with_max_chunk_size(4)
            .with_close_timeout(Duration::from_secs(1))
    }

    /// Starts a server that forwards every session and every text message.
    async fn echo_server(
        options: ServerOptions,
    ) -> anyhow::Result<(
        Server,
        SocketAddr,
        mpsc::UnboundedReceiver<Session>,
        mpsc::UnboundedReceiver<String>,
    )> {
        init_tracing();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        let server = Server::new(options);
        server.on_connect(move |session| {
            let message_tx = message_tx.clone();
            session.on_message(move |_, message| {
                if let Some(text) = message.as_text() {
                    let _ = message_tx.send(text.to_string());
                }
            });
            let _ = session_tx.send(session.clone());
        });

        let addr = server.start().await?;
        Ok((server, addr, session_rx, message_rx))
    }

    #[tokio::test]
    async fn test_fragmented_client_message_is_reassembled() -> anyhow::Result<()> {
        let (server, addr, mut sessions, mut messages) = echo_server(options()).await?;
        let (mut client, _) = connect_async(format!("ws://{addr}/")).await?;
        timeout(WAIT, sessions.recv()).await?;

        client
            .send(WsMessage::Frame(Frame::message(
                Bytes::from_static(b"hello, "),
                OpCode::Data(Data::Text),
                false,
            )))
            .await?;
        client
            .send(WsMessage::Frame(Frame::message(
                Bytes::from_static(b"world"),
                OpCode::Data(Data::Continue),
                true,
            )))
            .await?;

        let received = timeout(WAIT, messages.recv()).await?;
        assert_eq!(received.as_deref(), Some("hello, world"));

        server.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_chunked_send_arrives_whole() -> anyhow::Result<()> {
        let (server, addr, mut sessions, _messages) = echo_server(options()).await?;
        let (mut client, _) = connect_async(format!("ws://{addr}/")).await?;
        let session = timeout(WAIT, sessions.recv()).await?.expect("session");

        assert_eq!(server.connection_count(), 1);
        assert!(server.session(session.id()).is_some());

        session.send_text("abcdefghij").await?;

        let received = timeout(WAIT, client.next()).await?.expect("message")?;
        assert_eq!(received, WsMessage::Text("abcdefghij".into()));

        server.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_plain_request_is_rejected() -> anyhow::Result<()> {
        let (server, addr, mut sessions, _messages) = echo_server(options()).await?;

        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await?;

        let mut response = String::new();
        timeout(WAIT, stream.read_to_string(&mut response)).await??;
        assert!(response.starts_with("HTTP/1.1 400"));

        assert!(sessions.try_recv().is_err());
        assert_eq!(server.connection_count(), 0);

        server.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_path_is_not_found() -> anyhow::Result<()> {
        let (server, addr, _sessions, _messages) =
            echo_server(options().with_path("/ws")).await?;

        assert!(connect_async(format!("ws://{addr}/other")).await.is_err());

        let (_client, _) = connect_async(format!("ws://{addr}/ws/room")).await?;

        server.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_closes_clients() -> anyhow::Result<()> {
        let (server, addr, mut sessions, _messages) = echo_server(options()).await?;
        let (mut client, _) = connect_async(format!("ws://{addr}/")).await?;
        let session = timeout(WAIT, sessions.recv()).await?.expect("session");

        let closing = tokio::spawn(async move {
            let mut close = None;
            while let Some(Ok(message)) = client.next().await {
                if let WsMessage::Close(frame) = message {
                    close = frame.map(|f| CloseStatus::from(f.code));
                }
            }
            close
        });

        timeout(WAIT, server.stop()).await?;

        assert_eq!(timeout(WAIT, closing).await??, Some(CloseStatus::Normal));
        assert_eq!(session.state(), crate::session::SessionState::Closed);
        assert_eq!(server.connection_count(), 0);
        assert!(!server.is_running());

        // Second stop only waits.
        server.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_lifecycle_errors() -> anyhow::Result<()> {
        let server = Server::new(options());
        server.start().await?;

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle { .. }));

        server.stop().await;
        let err = server.start().await.unwrap_err();
        assert!(err.is_state_error());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_options_fail_start() {
        let server = Server::new(options().with_max_chunk_size(0));
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_ws_url_uses_bound_port() -> anyhow::Result<()> {
        let server = Server::new(options().with_path("/chat"));
        assert_eq!(server.ws_url(), "ws://127.0.0.1:0/chat");

        let addr = server.start().await?;
        assert_eq!(server.ws_url(), format!("ws://{addr}/chat"));

        server.stop().await;
        Ok(())
    }
}
