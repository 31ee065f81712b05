//! CRC32-C trailer wrapper.
//!
//! `Atomic<C>` wraps any codec and protects its encoding with a big-endian
//! CRC32-C (Castagnoli) computed over exactly the bytes the inner codec
//! produced:
//!
//! ```text
//! [ inner encoding ... ][ crc32c (u32 BE) ]
//! ```
//!
//! Wrap a reference to encode or decode without moving the value:
//!
//! ```ignore
//! writer.write(&Atomic(&record)).await?;
//! reader.read(&mut Atomic(&mut record)).await?;
//! ```

use crate::codec::{Decode, Encode};
use crate::error::CodecError;

/// Size of the CRC trailer in bytes.
pub const CRC_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atomic<C>(pub C);

impl<C> Atomic<C> {
    pub fn into_inner(self) -> C {
        self.0
    }
}

impl<C: Encode> Encode for Atomic<C> {
    fn encoded_size(&self) -> usize {
        self.0.encoded_size() + CRC_SIZE
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        // The inner codec sees only the room left after the trailer, so its
        // own limits (`TooLarge`) win over `ShortBuffer`.
        let body = buf.len().saturating_sub(CRC_SIZE);
        let n = self.0.encode(&mut buf[..body])?;
        let crc = crc32c::crc32c(&buf[..n]);
        buf[n..n + CRC_SIZE].copy_from_slice(&crc.to_be_bytes());
        Ok(n + CRC_SIZE)
    }
}

impl<C: Decode> Decode for Atomic<C> {
    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
        let n = self.0.decode(buf)?;
        if buf.len() < n + CRC_SIZE {
            return Err(CodecError::ShortBuffer);
        }
        let stored = u32::from_be_bytes([buf[n], buf[n + 1], buf[n + 2], buf[n + 3]]);
        if stored != crc32c::crc32c(&buf[..n]) {
            return Err(CodecError::Corrupt);
        }
        Ok(n + CRC_SIZE)
    }
}
