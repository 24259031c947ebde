//! In-memory transport and recording handlers for unit tests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};
use crate::handler::SessionHandler;
use crate::options::ServerOptions;
use crate::protocol::{Chunk, CloseStatus, Message, MessageType, TransportEvent};
use crate::session::Session;
use crate::transport::{ChunkReader, ChunkWriter};

type Feed = mpsc::UnboundedSender<Result<TransportEvent>>;

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// What a [`MemoryWriter`] was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sent {
    Chunk(Chunk),
    Ping,
    Close(CloseStatus, Option<String>),
    Shutdown,
}

/// Returns only the data chunks of a log, in order.
pub(crate) fn chunks_of(sent: &[Sent]) -> Vec<Chunk> {
    sent.iter()
        .filter_map(|s| match s {
            Sent::Chunk(chunk) => Some(chunk.clone()),
            _ => None,
        })
        .collect()
}

/// Channel-backed reader/writer pair.
///
/// By default the writer answers a close frame the way a well-behaved peer
/// would, by feeding the same status back to the reader.
pub(crate) struct MemoryTransport {
    feed: Feed,
    reader: Option<MemoryReader>,
    log: Arc<Mutex<Vec<Sent>>>,
    echo_close: bool,
    delay: Option<Duration>,
}

impl MemoryTransport {
    pub(crate) fn new() -> Self {
        let (feed, rx) = mpsc::unbounded_channel();
        Self {
            feed,
            reader: Some(MemoryReader { rx }),
            log: Arc::default(),
            echo_close: true,
            delay: None,
        }
    }

    /// A peer that never answers close frames.
    pub(crate) fn silent() -> Self {
        Self {
            echo_close: false,
            ..Self::new()
        }
    }

    /// Delays every chunk write.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Builds a `Connecting` session writing into this transport.
    pub(crate) fn session(&self, options: &ServerOptions) -> Session {
        let writer = MemoryWriter {
            log: Arc::clone(&self.log),
            echo: self.echo_close.then(|| self.feed.clone()),
            delay: self.delay,
        };
        Session::new(
            options,
            SocketAddr::from((Ipv4Addr::LOCALHOST, 40000)),
            "/",
            Box::new(writer),
            CancellationToken::new(),
        )
    }

    pub(crate) fn take_reader(&mut self) -> MemoryReader {
        self.reader.take().expect("reader already taken")
    }

    pub(crate) fn push(&self, chunk: Chunk) {
        let _ = self.feed.send(Ok(chunk.into()));
    }

    pub(crate) fn push_close(&self, status: CloseStatus) {
        let _ = self.feed.send(Ok(TransportEvent::Close(status)));
    }

    pub(crate) fn push_error(&self, error: Error) {
        let _ = self.feed.send(Err(error));
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.log.lock().clone()
    }
}

pub(crate) struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Result<TransportEvent>>,
}

#[async_trait]
impl ChunkReader for MemoryReader {
    async fn receive(&mut self) -> Result<TransportEvent> {
        self.rx.recv().await.unwrap_or(Err(Error::ConnectionClosed))
    }
}

pub(crate) struct MemoryWriter {
    log: Arc<Mutex<Vec<Sent>>>,
    echo: Option<Feed>,
    delay: Option<Duration>,
}

#[async_trait]
impl ChunkWriter for MemoryWriter {
    async fn send_chunk(
        &mut self,
        kind: MessageType,
        payload: Bytes,
        end_of_message: bool,
    ) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log
            .lock()
            .push(Sent::Chunk(Chunk::new(kind, payload, end_of_message)));
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.log.lock().push(Sent::Ping);
        Ok(())
    }

    async fn close(&mut self, status: CloseStatus, reason: Option<&str>) -> Result<()> {
        self.log
            .lock()
            .push(Sent::Close(status, reason.map(str::to_string)));
        if let Some(echo) = &self.echo {
            let _ = echo.send(Ok(TransportEvent::Close(status)));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.log.lock().push(Sent::Shutdown);
        Ok(())
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Collects dispatched occurrences from any number of named handlers into
/// one ordered log.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn named(&self, name: &'static str) -> Arc<dyn SessionHandler> {
        Arc::new(Named {
            name,
            events: Arc::clone(&self.events),
        })
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

struct Named {
    name: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl SessionHandler for Named {
    fn on_message(&self, _session: &Session, message: &Message) {
        let body = match message.as_text() {
            Some(text) => format!("text:{text}"),
            None => format!("binary:{}", message.len()),
        };
        self.events.lock().push(format!("{}:message:{body}", self.name));
    }

    fn on_close(&self, _session: &Session, status: CloseStatus) {
        self.events.lock().push(format!("{}:close:{status}", self.name));
    }

    fn on_error(&self, _session: &Session, error: &Error) {
        self.events.lock().push(format!("{}:error:{error}", self.name));
    }
}
