//! Record Codec
//!
//! A record is the unit of data in a Styx log: an opaque byte payload.
//!
//! ## Encoding
//!
//! ```text
//! ┌──────────────┬──────────────────┐
//! │ Size (i32 BE)│ Payload          │
//! │ 4 bytes      │ Size bytes       │
//! └──────────────┴──────────────────┘
//! ```
//!
//! On disk every record is wrapped in [`Atomic`](crate::Atomic), which adds a
//! CRC32-C trailer, so a record of `n` payload bytes occupies `n + 8` bytes.
//!
//! ## Ownership
//!
//! Decoding copies the payload into the record's own buffer. A `Record` used
//! as a read target is meant to be reused across reads: its allocation is
//! kept and only grows.

use bytes::{Bytes, BytesMut};

use crate::codec::{Decode, Encode};
use crate::error::CodecError;

/// Largest payload a record may carry: `2^31 - 9`, so that the size prefix
/// and CRC trailer still fit in a signed 32-bit length.
pub const MAX_PAYLOAD_SIZE: usize = (1 << 31) - 9;

/// Bytes taken by the size prefix.
pub const SIZE_PREFIX: usize = 4;

/// A single log record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    payload: BytesMut,
}

impl Record {
    /// Create a record holding a copy of `payload`.
    pub fn new(payload: impl AsRef<[u8]>) -> Self {
        Self {
            payload: BytesMut::from(payload.as_ref()),
        }
    }

    /// Create an empty record with room for `capacity` payload bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            payload: BytesMut::with_capacity(capacity),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Replace the payload, reusing the existing allocation.
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.payload.clear();
        self.payload.extend_from_slice(payload);
    }

    /// Take the payload out as an immutable `Bytes`, leaving the record empty.
    pub fn take_payload(&mut self) -> Bytes {
        self.payload.split().freeze()
    }
}

impl From<Bytes> for Record {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

impl From<Vec<u8>> for Record {
    fn from(payload: Vec<u8>) -> Self {
        Self {
            payload: BytesMut::from(&payload[..]),
        }
    }
}

impl Encode for Record {
    fn encoded_size(&self) -> usize {
        SIZE_PREFIX + self.payload.len()
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_SIZE {
            return Err(CodecError::TooLarge);
        }
        let total = SIZE_PREFIX + len;
        if buf.len() < total {
            return Err(CodecError::ShortBuffer);
        }

        buf[..SIZE_PREFIX].copy_from_slice(&(len as i32).to_be_bytes());
        buf[SIZE_PREFIX..total].copy_from_slice(&self.payload);
        Ok(total)
    }
}

impl Decode for Record {
    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
        if buf.len() < SIZE_PREFIX {
            return Err(CodecError::ShortBuffer);
        }
        let size = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if size < 0 || size as usize > MAX_PAYLOAD_SIZE {
            return Err(CodecError::Corrupt);
        }

        let total = SIZE_PREFIX + size as usize;
        if buf.len() < total {
            return Err(CodecError::ShortBuffer);
        }

        self.set_payload(&buf[SIZE_PREFIX..total]);
        Ok(total)
    }
}
