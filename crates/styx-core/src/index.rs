//! Index Entry Codec
//!
//! A sparse index entry maps a record position to its byte offset in the
//! log. Segment writers emit one every `IndexAfterSize` bytes.
//!
//! ```text
//! ┌────────────────────┬────────────────────┐
//! │ Position (i64 BE)  │ Offset (i64 BE)    │
//! └────────────────────┴────────────────────┘
//! ```
//!
//! Wrapped in [`Atomic`](crate::Atomic) on disk, so each entry is
//! [`INDEX_ENTRY_SIZE`] = 20 bytes.

use crate::codec::{Decode, Encode};
use crate::error::CodecError;

/// Encoded size without the CRC trailer.
pub const INDEX_ENTRY_ENCODED_SIZE: usize = 16;

/// On-disk size of one entry including its CRC32-C trailer.
pub const INDEX_ENTRY_SIZE: usize = INDEX_ENTRY_ENCODED_SIZE + crate::atomic::CRC_SIZE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub position: i64,
    pub offset: i64,
}

impl IndexEntry {
    pub fn new(position: i64, offset: i64) -> Self {
        Self { position, offset }
    }
}

impl Encode for IndexEntry {
    fn encoded_size(&self) -> usize {
        INDEX_ENTRY_ENCODED_SIZE
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if buf.len() < INDEX_ENTRY_ENCODED_SIZE {
            return Err(CodecError::ShortBuffer);
        }
        buf[..8].copy_from_slice(&self.position.to_be_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_be_bytes());
        Ok(INDEX_ENTRY_ENCODED_SIZE)
    }
}

impl Decode for IndexEntry {
    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
        if buf.len() < INDEX_ENTRY_ENCODED_SIZE {
            return Err(CodecError::ShortBuffer);
        }
        let mut position = [0u8; 8];
        let mut offset = [0u8; 8];
        position.copy_from_slice(&buf[..8]);
        offset.copy_from_slice(&buf[8..16]);

        self.position = i64::from_be_bytes(position);
        self.offset = i64::from_be_bytes(offset);
        Ok(INDEX_ENTRY_ENCODED_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_entry_layout() {
        let entry = IndexEntry::new(42, 4096);
        let mut buf = [0u8; 16];
        entry.encode(&mut buf).unwrap();

        assert_eq!(&buf[..8], &42i64.to_be_bytes());
        assert_eq!(&buf[8..], &4096i64.to_be_bytes());

        let mut decoded = IndexEntry::default();
        assert_eq!(decoded.decode(&buf).unwrap(), 16);
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_index_entry_short_buffer() {
        let mut entry = IndexEntry::default();
        assert_eq!(entry.decode(&[0u8; 15]), Err(CodecError::ShortBuffer));
        assert_eq!(
            IndexEntry::new(1, 2).encode(&mut [0u8; 8]),
            Err(CodecError::ShortBuffer)
        );
    }
}
