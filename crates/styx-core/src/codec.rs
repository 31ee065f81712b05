//! Encode/Decode traits shared by every on-disk value.
//!
//! Codecs work against caller-provided byte slices and never allocate on the
//! encode path. A codec that cannot complete because the slice is too short
//! returns [`CodecError::ShortBuffer`] and leaves no observable state behind,
//! so the buffered I/O layer can flush or fill and simply try again.

use crate::error::CodecError;

/// A value with a fixed binary encoding.
pub trait Encode {
    /// Exact number of bytes `encode` will write.
    fn encoded_size(&self) -> usize;

    /// Encode into `buf`, returning the number of bytes written.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError>;
}

/// A value that can be decoded in place from a byte slice.
pub trait Decode {
    /// Decode from the front of `buf`, returning the number of bytes consumed.
    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError>;
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encoded_size(&self) -> usize {
        (**self).encoded_size()
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        (**self).encode(buf)
    }
}

impl<T: Encode + ?Sized> Encode for &mut T {
    fn encoded_size(&self) -> usize {
        (**self).encoded_size()
    }

    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        (**self).encode(buf)
    }
}

impl<T: Decode + ?Sized> Decode for &mut T {
    fn decode(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
        (**self).decode(buf)
    }
}
