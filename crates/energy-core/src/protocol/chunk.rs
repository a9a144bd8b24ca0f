//! Splitting encrypted payloads into link-sized chunks and putting them back
//! together.
//!
//! A notification on the link carries only a few bytes, so an encoded
//! [`crate::crypto::encryption::EncryptedPayload`] is cut into chunks:
//!
//! ```text
//! [index:1][total:1][payload:≤max]
//! ```
//!
//! `index` is zero-based and every chunk of a message carries the same
//! `total`.  Chunks may arrive in any order; the receiver sorts by index.
//! Because the header is one byte per field, a message is limited to 255
//! chunks.

use std::collections::BTreeMap;

use super::codec::{ProtocolError, WireDecode, WireEncode, WireReader, WireWriter};

/// Highest chunk count a message can have.
pub const MAX_CHUNKS: usize = u8::MAX as usize;

/// Bytes of header in front of every chunk payload.
pub const CHUNK_HEADER_LEN: usize = 2;

/// One fragment of a chunked message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u8,
    pub total: u8,
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Parses one notification.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] if the notification is
    /// shorter than the header or the header is inconsistent.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        super::codec::decode(bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        super::codec::encode(self)
    }
}

/// Largest chunk payload that fits in a notification of `max_notification_len`
/// bytes, or `None` if not even the header fits.
pub fn max_payload_for(max_notification_len: usize) -> Option<usize> {
    max_notification_len
        .checked_sub(CHUNK_HEADER_LEN)
        .filter(|&n| n > 0)
}

/// Splits `bytes` into `ceil(len / max_chunk_payload)` chunks.
///
/// An empty input yields a single empty chunk so that every message has at
/// least one notification.
///
/// # Errors
///
/// - [`ProtocolError::MalformedMessage`] if `max_chunk_payload` is zero.
/// - [`ProtocolError::PayloadTooLarge`] if more than [`MAX_CHUNKS`] chunks
///   would be needed.
pub fn split(bytes: &[u8], max_chunk_payload: usize) -> Result<Vec<Chunk>, ProtocolError> {
    if max_chunk_payload == 0 {
        return Err(ProtocolError::MalformedMessage(
            "chunk payload size must be at least one byte".to_string(),
        ));
    }
    if bytes.is_empty() {
        return Ok(vec![Chunk {
            index: 0,
            total: 1,
            payload: Vec::new(),
        }]);
    }

    let count = bytes.len().div_ceil(max_chunk_payload);
    if count > MAX_CHUNKS {
        return Err(ProtocolError::PayloadTooLarge {
            size: bytes.len(),
            max: MAX_CHUNKS,
        });
    }

    let total = count as u8;
    Ok(bytes
        .chunks(max_chunk_payload)
        .enumerate()
        .map(|(i, part)| Chunk {
            index: i as u8,
            total,
            payload: part.to_vec(),
        })
        .collect())
}

/// Reassembles a complete set of chunks in any order.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] if the set is empty, the
/// chunks disagree on `total`, an index repeats, or an index is missing.
pub fn reassemble(chunks: &[Chunk]) -> Result<Vec<u8>, ProtocolError> {
    let first = chunks
        .first()
        .ok_or_else(|| ProtocolError::MalformedMessage("no chunks to reassemble".to_string()))?;

    let mut buffer = ChunkBuffer::new();
    let mut complete = None;
    for chunk in chunks {
        if complete.is_some() {
            return Err(ProtocolError::MalformedMessage(format!(
                "more than the declared {} chunks",
                first.total
            )));
        }
        complete = buffer.push(chunk.clone())?;
    }
    complete.ok_or_else(|| {
        ProtocolError::MalformedMessage(format!(
            "received {} of {} chunks",
            buffer.received(),
            first.total
        ))
    })
}

/// Incremental reassembly of one in-flight message.
///
/// Chunks are keyed by index; the message completes as soon as `total`
/// distinct indices have arrived.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    total: Option<u8>,
    parts: BTreeMap<u8, Vec<u8>>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one chunk, returning the reassembled bytes once complete.
    ///
    /// The buffer resets itself after completing, ready for the next message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] on a zero or inconsistent
    /// `total`, an index outside `0..total`, or a duplicate index.  The
    /// buffer is reset after an error.
    pub fn push(&mut self, chunk: Chunk) -> Result<Option<Vec<u8>>, ProtocolError> {
        let result = self.accept(chunk);
        if !matches!(result, Ok(None)) {
            self.reset();
        }
        result
    }

    fn accept(&mut self, chunk: Chunk) -> Result<Option<Vec<u8>>, ProtocolError> {
        if chunk.total == 0 {
            return Err(ProtocolError::MalformedMessage(
                "chunk declares zero total chunks".to_string(),
            ));
        }
        let total = *self.total.get_or_insert(chunk.total);
        if chunk.total != total {
            return Err(ProtocolError::MalformedMessage(format!(
                "chunk {} declares {} total chunks, expected {total}",
                chunk.index, chunk.total
            )));
        }
        if chunk.index >= total {
            return Err(ProtocolError::MalformedMessage(format!(
                "chunk index {} out of range for {total} chunks",
                chunk.index
            )));
        }
        if self.parts.insert(chunk.index, chunk.payload).is_some() {
            return Err(ProtocolError::MalformedMessage(format!(
                "duplicate chunk index {}",
                chunk.index
            )));
        }

        if self.parts.len() < total as usize {
            return Ok(None);
        }
        Ok(Some(
            std::mem::take(&mut self.parts).into_values().flatten().collect(),
        ))
    }

    /// Discards any partial message.
    pub fn reset(&mut self) {
        self.total = None;
        self.parts.clear();
    }

    /// Number of distinct chunks held.
    pub fn received(&self) -> usize {
        self.parts.len()
    }

    pub fn is_active(&self) -> bool {
        self.total.is_some()
    }
}

// ── Wire encoding ─────────────────────────────────────────────────────────────

impl WireEncode for Chunk {
    fn encode_to(&self, w: &mut WireWriter) {
        w.put_u8(self.index);
        w.put_u8(self.total);
        w.put_raw(&self.payload);
    }
}

impl WireDecode for Chunk {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let index = r.read_u8("chunk index")?;
        let total = r.read_u8("chunk total")?;
        if total == 0 || index >= total {
            return Err(ProtocolError::MalformedMessage(format!(
                "chunk header {index}/{total} is inconsistent"
            )));
        }
        Ok(Self {
            index,
            total,
            payload: r.read_rest().to_vec(),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_split_produces_ceiling_count_with_shared_total() {
        // Arrange
        let bytes = sample(41);

        // Act
        let chunks = split(&bytes, 18).unwrap();

        // Assert
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.total == 3));
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(chunks[2].payload.len(), 5);
    }

    #[test]
    fn test_split_reassemble_round_trip_for_every_chunk_size() {
        let bytes = sample(100);
        for size in 1..=120 {
            let chunks = split(&bytes, size).unwrap();
            assert_eq!(reassemble(&chunks).unwrap(), bytes, "chunk size {size}");
        }
    }

    #[test]
    fn test_reassemble_is_order_independent() {
        // Arrange
        let bytes = sample(90);
        let mut chunks = split(&bytes, 7).unwrap();

        // Act: deterministic interleaving instead of a random shuffle.
        chunks.reverse();
        chunks.rotate_left(5);
        chunks.swap(0, 7);

        // Assert
        assert_eq!(reassemble(&chunks).unwrap(), bytes);
    }

    #[test]
    fn test_split_empty_payload_yields_one_empty_chunk() {
        let chunks = split(&[], 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(reassemble(&chunks).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_split_rejects_zero_chunk_size() {
        assert!(matches!(
            split(b"abc", 0),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_split_rejects_payload_needing_more_than_255_chunks() {
        assert!(split(&sample(255), 1).is_ok());
        assert_eq!(
            split(&sample(256), 1),
            Err(ProtocolError::PayloadTooLarge {
                size: 256,
                max: MAX_CHUNKS
            })
        );
    }

    #[test]
    fn test_reassemble_rejects_missing_chunk() {
        let mut chunks = split(&sample(30), 10).unwrap();
        chunks.remove(1);
        assert!(matches!(
            reassemble(&chunks),
            Err(ProtocolError::MalformedMessage(m)) if m.contains("2 of 3")
        ));
    }

    #[test]
    fn test_reassemble_rejects_duplicate_chunk() {
        let mut chunks = split(&sample(30), 10).unwrap();
        chunks[2] = chunks[0].clone();
        assert!(matches!(
            reassemble(&chunks),
            Err(ProtocolError::MalformedMessage(m)) if m.contains("duplicate")
        ));
    }

    #[test]
    fn test_reassemble_rejects_inconsistent_totals() {
        let mut chunks = split(&sample(30), 10).unwrap();
        chunks[1].total = 4;
        assert!(reassemble(&chunks).is_err());
    }

    #[test]
    fn test_reassemble_rejects_empty_input() {
        assert!(reassemble(&[]).is_err());
    }

    #[test]
    fn test_chunk_buffer_completes_on_last_distinct_index() {
        // Arrange
        let bytes = sample(25);
        let chunks = split(&bytes, 10).unwrap();
        let mut buffer = ChunkBuffer::new();

        // Act
        assert_eq!(buffer.push(chunks[2].clone()).unwrap(), None);
        assert!(buffer.is_active());
        assert_eq!(buffer.push(chunks[0].clone()).unwrap(), None);
        let complete = buffer.push(chunks[1].clone()).unwrap();

        // Assert
        assert_eq!(complete, Some(bytes));
        assert!(!buffer.is_active());
    }

    #[test]
    fn test_chunk_buffer_resets_after_error() {
        let chunks = split(&sample(25), 10).unwrap();
        let mut buffer = ChunkBuffer::new();
        buffer.push(chunks[0].clone()).unwrap();

        assert!(buffer.push(chunks[0].clone()).is_err());
        assert_eq!(buffer.received(), 0);
    }

    #[test]
    fn test_chunk_wire_form_is_header_then_payload() {
        let chunk = Chunk {
            index: 1,
            total: 2,
            payload: vec![0xAA, 0xBB],
        };
        assert_eq!(chunk.to_bytes(), vec![1, 2, 0xAA, 0xBB]);
        assert_eq!(Chunk::from_bytes(&[1, 2, 0xAA, 0xBB]).unwrap(), chunk);
        assert!(Chunk::from_bytes(&[2, 2]).is_err());
        assert!(Chunk::from_bytes(&[0]).is_err());
    }

    #[test]
    fn test_max_payload_for_subtracts_header() {
        assert_eq!(max_payload_for(20), Some(18));
        assert_eq!(max_payload_for(2), None);
    }
}
