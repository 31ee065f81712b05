//! Error Types for Styx Core
//!
//! ## Error Categories
//!
//! ### Codec Errors (`CodecError`)
//! - `ShortBuffer`: the buffer cannot hold (encode) or does not yet contain
//!   (decode) a complete value. Internal: buffered I/O retries after
//!   flushing or filling.
//! - `TooLarge`: the payload exceeds `MAX_PAYLOAD_SIZE`.
//! - `Corrupt`: negative or oversized size prefix, or CRC mismatch.
//!
//! ### Buffered I/O Errors (`RecioError`)
//! - `MustFlush` / `MustFill`: Manual-mode signals, the caller drives I/O.
//! - `Eof` / `UnexpectedEof`: end of the source, cleanly or mid-record.
//! - `TooLarge`: one encoded value does not fit in the whole buffer.
//! - `ShortWrite`: the sink accepted fewer bytes than offered.
//! - `RecordTooLarge` / `Corrupt`: codec failures surfaced through I/O.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("short buffer")]
    ShortBuffer,

    #[error("payload too large")]
    TooLarge,

    #[error("corrupt data")]
    Corrupt,
}

#[derive(Debug, Error)]
pub enum RecioError {
    #[error("buffer must be flushed")]
    MustFlush,

    #[error("buffer must be filled")]
    MustFill,

    #[error("end of stream")]
    Eof,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("record too large for buffer")]
    TooLarge,

    #[error("short write")]
    ShortWrite,

    #[error("record payload too large")]
    RecordTooLarge,

    #[error("corrupt record")]
    Corrupt,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecioError {
    /// True for the Manual-mode signals that ask the caller to do I/O.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecioError::MustFlush | RecioError::MustFill)
    }
}

impl From<CodecError> for RecioError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::ShortBuffer | CodecError::TooLarge => RecioError::RecordTooLarge,
            CodecError::Corrupt => RecioError::Corrupt,
        }
    }
}
