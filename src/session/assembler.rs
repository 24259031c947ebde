//! Fragment reassembly.
//!
//! [`MessageAssembler`] folds successive [`Chunk`]s into one [`Message`].
//!
//! | Current | Event | Next |
//! |---------|-------|------|
//! | Idle | chunk, not final | Accumulating |
//! | Idle | chunk, final | emit message, Idle |
//! | Accumulating | chunk of same type, not final | Accumulating |
//! | Accumulating | chunk of same type, final | emit message, Idle |
//! | Accumulating | chunk of other type | error, Idle |
//!
//! Close signals and transport errors are handled by the pump, which calls
//! [`MessageAssembler::reset`] to drop whatever was in progress.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::{Chunk, Message, MessageType};

// ============================================================================
// MessageAssembler
// ============================================================================

/// Per-connection reassembly state machine.
#[derive(Debug)]
pub struct MessageAssembler {
    /// In-progress message, `None` while idle.
    partial: Option<Partial>,
    /// Largest message accepted, in bytes.
    max_message_size: usize,
}

#[derive(Debug)]
struct Partial {
    kind: MessageType,
    buffer: BytesMut,
}

impl MessageAssembler {
    /// Creates an idle assembler.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            partial: None,
            max_message_size,
        }
    }

    /// Returns `true` while a message has started but not finished.
    #[inline]
    #[must_use]
    pub fn is_accumulating(&self) -> bool {
        self.partial.is_some()
    }

    /// Returns the number of bytes held for the in-progress message.
    #[inline]
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.partial.as_ref().map_or(0, |p| p.buffer.len())
    }

    /// Feeds one chunk.
    ///
    /// Returns the finished message when `chunk.end_of_message` is set.
    /// On error the in-progress message is discarded and the assembler is
    /// idle again.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the chunk type differs from the message type
    /// - [`Error::MessageTooBig`] if the message would exceed the size limit
    /// - [`Error::InvalidUtf8`] if a finished text message is not UTF-8
    pub fn push(&mut self, chunk: Chunk) -> Result<Option<Message>> {
        let Chunk {
            kind,
            payload,
            end_of_message,
        } = chunk;

        let Some(mut partial) = self.partial.take() else {
            self.check_size(payload.len())?;

            if end_of_message {
                // Single-chunk message: no copy needed.
                return finalize(kind, payload).map(Some);
            }

            let mut buffer = BytesMut::with_capacity(payload.len());
            buffer.extend_from_slice(&payload);
            self.partial = Some(Partial { kind, buffer });
            return Ok(None);
        };

        if partial.kind != kind {
            return Err(Error::protocol(format!(
                "{kind} chunk arrived while assembling a {} message",
                partial.kind
            )));
        }

        self.check_size(partial.buffer.len() + payload.len())?;
        partial.buffer.extend_from_slice(&payload);

        if end_of_message {
            return finalize(partial.kind, partial.buffer.freeze()).map(Some);
        }

        self.partial = Some(partial);
        Ok(None)
    }

    /// Discards any in-progress message.
    ///
    /// Returns `true` if something was discarded.
    pub fn reset(&mut self) -> bool {
        self.partial.take().is_some()
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            return Err(Error::message_too_big(size, self.max_message_size));
        }
        Ok(())
    }
}

fn finalize(kind: MessageType, data: Bytes) -> Result<Message> {
    Message::from_parts(kind, data)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    const LIMIT: usize = 1 << 20;

    fn feed(assembler: &mut MessageAssembler, chunks: Vec<Chunk>) -> Vec<Message> {
        chunks
            .into_iter()
            .filter_map(|chunk| assembler.push(chunk).expect("valid chunk"))
            .collect()
    }

    #[test]
    fn test_single_chunk_message() {
        let mut assembler = MessageAssembler::new(LIMIT);
        let message = assembler
            .push(Chunk::last(MessageType::Text, "hello"))
            .unwrap()
            .expect("complete");

        assert_eq!(message.text().unwrap(), "hello");
        assert!(!assembler.is_accumulating());
    }

    #[test]
    fn test_multi_chunk_message() {
        let mut assembler = MessageAssembler::new(LIMIT);

        assert!(assembler.push(Chunk::partial(MessageType::Binary, vec![1u8, 2])).unwrap().is_none());
        assert!(assembler.is_accumulating());
        assert_eq!(assembler.buffered_len(), 2);
        assert!(assembler.push(Chunk::partial(MessageType::Binary, vec![3u8])).unwrap().is_none());

        let message = assembler
            .push(Chunk::last(MessageType::Binary, vec![4u8, 5]))
            .unwrap()
            .expect("complete");

        assert_eq!(message.binary().unwrap(), &[1, 2, 3, 4, 5]);
        assert!(!assembler.is_accumulating());
    }

    #[test]
    fn test_empty_final_chunk_finalizes() {
        let mut assembler = MessageAssembler::new(LIMIT);
        assembler.push(Chunk::partial(MessageType::Text, "abc")).unwrap();
        assembler.push(Chunk::partial(MessageType::Text, "")).unwrap();

        let message = assembler
            .push(Chunk::last(MessageType::Text, ""))
            .unwrap()
            .expect("complete");
        assert_eq!(message.text().unwrap(), "abc");
    }

    #[test]
    fn test_zero_length_messages_are_emitted() {
        let mut assembler = MessageAssembler::new(LIMIT);

        let binary = assembler
            .push(Chunk::last(MessageType::Binary, Bytes::new()))
            .unwrap()
            .expect("empty binary message");
        assert_eq!(binary.kind(), MessageType::Binary);
        assert!(binary.is_empty());

        let text = assembler
            .push(Chunk::last(MessageType::Text, Bytes::new()))
            .unwrap()
            .expect("empty text message");
        assert_eq!(text.text().unwrap(), "");
    }

    #[test]
    fn test_type_mismatch_is_protocol_error() {
        let mut assembler = MessageAssembler::new(LIMIT);
        assembler.push(Chunk::partial(MessageType::Text, "a")).unwrap();

        let err = assembler
            .push(Chunk::last(MessageType::Binary, vec![1u8]))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(!assembler.is_accumulating());
    }

    #[test]
    fn test_size_limit() {
        let mut assembler = MessageAssembler::new(4);
        assembler.push(Chunk::partial(MessageType::Binary, vec![0u8; 3])).unwrap();

        let err = assembler
            .push(Chunk::last(MessageType::Binary, vec![0u8; 2]))
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooBig { size: 5, limit: 4 }));
        assert!(!assembler.is_accumulating());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut assembler = MessageAssembler::new(LIMIT);
        let err = assembler
            .push(Chunk::last(MessageType::Text, vec![0xffu8, 0xfe]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidUtf8(_)));
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let bytes = "é".as_bytes();
        let mut assembler = MessageAssembler::new(LIMIT);
        assembler.push(Chunk::partial(MessageType::Text, bytes[..1].to_vec())).unwrap();

        let message = assembler
            .push(Chunk::last(MessageType::Text, bytes[1..].to_vec()))
            .unwrap()
            .expect("complete");
        assert_eq!(message.text().unwrap(), "é");
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut assembler = MessageAssembler::new(LIMIT);
        assert!(!assembler.reset());

        assembler.push(Chunk::partial(MessageType::Binary, vec![1u8])).unwrap();
        assert!(assembler.reset());

        let message = assembler
            .push(Chunk::last(MessageType::Binary, vec![2u8]))
            .unwrap()
            .expect("complete");
        assert_eq!(message.binary().unwrap(), &[2]);
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut assembler = MessageAssembler::new(LIMIT);
        let messages = feed(
            &mut assembler,
            vec![
                Chunk::partial(MessageType::Text, "ab"),
                Chunk::last(MessageType::Text, "c"),
                Chunk::last(MessageType::Binary, vec![7u8]),
            ],
        );

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text().unwrap(), "abc");
        assert_eq!(messages[1].binary().unwrap(), &[7]);
    }

    proptest! {
        #[test]
        fn prop_any_split_reassembles_exactly(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..32),
        ) {
            let mut boundaries: Vec<usize> = cuts.iter().map(|c| c.index(data.len() + 1)).collect();
            boundaries.push(0);
            boundaries.push(data.len());
            boundaries.sort_unstable();

            let mut chunks: Vec<Chunk> = boundaries
                .windows(2)
                .map(|w| Chunk::partial(MessageType::Binary, data[w[0]..w[1]].to_vec()))
                .collect();
            if let Some(last) = chunks.last_mut() {
                last.end_of_message = true;
            }

            let mut assembler = MessageAssembler::new(LIMIT);
            let messages = feed(&mut assembler, chunks);

            prop_assert_eq!(messages.len(), 1);
            prop_assert_eq!(messages[0].kind(), MessageType::Binary);
            prop_assert_eq!(messages[0].binary().unwrap(), &data[..]);
            prop_assert!(!assembler.is_accumulating());
        }

        #[test]
        fn prop_one_byte_chunks_keep_text_type(text in "\\PC{0,64}") {
            let bytes = text.as_bytes();
            let mut chunks: Vec<Chunk> = bytes
                .iter()
                .map(|b| Chunk::partial(MessageType::Text, vec![*b]))
                .collect();
            chunks.push(Chunk::last(MessageType::Text, Bytes::new()));

            let mut assembler = MessageAssembler::new(LIMIT);
            let messages = feed(&mut assembler, chunks);

            prop_assert_eq!(messages.len(), 1);
            prop_assert_eq!(messages[0].text().unwrap(), text.as_str());
        }
    }
}
