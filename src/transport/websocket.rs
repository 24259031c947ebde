//! Chunk reader and writer over `tokio-tungstenite`.
//!
//! `tungstenite` hands over whole messages. [`WebSocketReader`] slices each
//! one into chunks of at most `max_chunk_size` bytes, so the session sees
//! the same fragment stream whatever the peer's framing was.
//!
//! [`WebSocketWriter`] writes raw data frames: the first chunk of a message
//! carries its type, later chunks are continuation frames, and only the
//! last one has FIN set.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{Chunk, CloseStatus, MessageType, TransportEvent};

use super::{ChunkReader, ChunkWriter};

// ============================================================================
// split
// ============================================================================

/// Splits an upgraded stream into a chunk reader and a chunk writer.
#[must_use]
pub fn split<S>(
    stream: WebSocketStream<S>,
    max_chunk_size: usize,
) -> (WebSocketReader<S>, WebSocketWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = stream.split();

    let reader = WebSocketReader {
        stream,
        pending: None,
        max_chunk_size: max_chunk_size.max(1),
    };
    let writer = WebSocketWriter {
        sink,
        in_message: false,
    };

    (reader, writer)
}

// ============================================================================
// WebSocketReader
// ============================================================================

/// Receiving half of an upgraded stream.
pub struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    /// Unread tail of the current message.
    pending: Option<(MessageType, Bytes)>,
    max_chunk_size: usize,
}

impl<S> WebSocketReader<S> {
    /// Takes the next chunk of the pending message, if any.
    fn next_chunk(&mut self) -> Option<Chunk> {
        let (kind, mut rest) = self.pending.take()?;

        if rest.len() > self.max_chunk_size {
            let head = rest.split_to(self.max_chunk_size);
            self.pending = Some((kind, rest));
            return Some(Chunk::partial(kind, head));
        }

        Some(Chunk::last(kind, rest))
    }
}

#[async_trait]
impl<S> ChunkReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<TransportEvent> {
        loop {
            if let Some(chunk) = self.next_chunk() {
                return Ok(chunk.into());
            }

            let Some(frame) = self.stream.next().await else {
                return Err(Error::ConnectionClosed);
            };

            match frame? {
                WsMessage::Binary(data) => {
                    self.pending = Some((MessageType::Binary, data));
                }
                WsMessage::Text(text) => {
                    self.pending = Some((MessageType::Text, Bytes::from(text)));
                }
                WsMessage::Close(frame) => {
                    let status = frame.map_or(CloseStatus::Empty, |f| CloseStatus::from(f.code));
                    return Ok(TransportEvent::Close(status));
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => {
                    trace!("Control frame received");
                }
                WsMessage::Frame(_) => {}
            }
        }
    }
}

// ============================================================================
// WebSocketWriter
// ============================================================================

/// Sending half of an upgraded stream.
pub struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
    /// Set between the first and the last chunk of a message.
    in_message: bool,
}

impl<S> WebSocketWriter<S> {
    fn opcode(&self, kind: MessageType) -> OpCode {
        let data = match (self.in_message, kind) {
            (true, _) => Data::Continue,
            (false, MessageType::Binary) => Data::Binary,
            (false, MessageType::Text) => Data::Text,
        };
        OpCode::Data(data)
    }
}

#[async_trait]
impl<S> ChunkWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_chunk(
        &mut self,
        kind: MessageType,
        payload: Bytes,
        end_of_message: bool,
    ) -> Result<()> {
        let frame = Frame::message(payload, self.opcode(kind), end_of_message);

        // Cleared before the write so a failed send does not leave the
        // next message starting as a continuation.
        self.in_message = false;
        self.sink.send(WsMessage::Frame(frame)).await?;
        self.in_message = !end_of_message;

        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.sink.send(WsMessage::Ping(Bytes::new())).await?;
        Ok(())
    }

    async fn close(&mut self, status: CloseStatus, reason: Option<&str>) -> Result<()> {
        let frame = status.code().map(|_| CloseFrame {
            code: status.into(),
            reason: reason.unwrap_or_default().to_owned().into(),
        });

        self.sink.send(WsMessage::Close(frame)).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
