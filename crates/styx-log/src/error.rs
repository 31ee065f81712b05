//! Log Engine Error Types
//!
//! Every failure the engine can report maps to one variant here.
//!
//! ## Error Categories
//!
//! ### Buffering Signals
//! - `MustFlush` / `MustFill`: Manual-mode requests for the caller to drive I/O
//! - `SegmentFull`: internal roll signal from a segment writer, never
//!   surfaced by `LogWriter`
//!
//! ### Data Integrity
//! - `Corrupt`: CRC mismatch, bad size prefix, truncated record, missing
//!   segment, or an invalid config/archive
//! - `BadVersion`: config file written by an unknown version
//! - `RecordTooLarge` / `TooLarge`: a record exceeds the record or buffer limit
//!
//! ### Positioning
//! - `Eof`, `OutOfRange`, `Lagging`, `Timeout`, `Closed`
//!
//! ### Directory State
//! - `Exist` / `NotExist`, `Locked` / `Orphaned`
//!
//! ### Coordination
//! - `WriterActive`: a second writer was requested for the same log
//! - `SyncFailed`: the background syncer stopped on an I/O error

use styx_core::RecioError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer must be flushed")]
    MustFlush,

    #[error("buffer must be filled")]
    MustFill,

    #[error("segment is full")]
    SegmentFull,

    #[error("record too large for buffer")]
    TooLarge,

    #[error("short write")]
    ShortWrite,

    #[error("record too large")]
    RecordTooLarge,

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("unsupported config version: {0}")]
    BadVersion(u32),

    #[error("end of log")]
    Eof,

    #[error("unexpected end of file")]
    UnexpectedEof,

    #[error("position out of range")]
    OutOfRange,

    #[error("reader position has been expired by retention")]
    Lagging,

    #[error("closed")]
    Closed,

    #[error("wait deadline expired")]
    Timeout,

    #[error("log is locked by another holder")]
    Locked,

    #[error("orphaned lock file")]
    Orphaned,

    #[error("already exists")]
    Exist,

    #[error("does not exist")]
    NotExist,

    #[error("another writer is active")]
    WriterActive,

    #[error("background sync failed: {0}")]
    SyncFailed(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid log name: {0}")]
    InvalidName(String),

    #[error("log not found: {0}")]
    NotFound(String),

    #[error("log unavailable: {0}")]
    Unavailable(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt(_))
    }

    /// True for the Manual-mode signals that ask the caller to do I/O.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::MustFlush | Error::MustFill)
    }
}

impl From<RecioError> for Error {
    fn from(err: RecioError) -> Self {
        match err {
            RecioError::MustFlush => Error::MustFlush,
            RecioError::MustFill => Error::MustFill,
            RecioError::Eof => Error::Eof,
            RecioError::UnexpectedEof => Error::UnexpectedEof,
            RecioError::TooLarge => Error::TooLarge,
            RecioError::ShortWrite => Error::ShortWrite,
            RecioError::RecordTooLarge => Error::RecordTooLarge,
            RecioError::Corrupt => Error::corrupt("record checksum or size prefix"),
            RecioError::Io(e) => Error::Io(e),
        }
    }
}

/// Map a `NotFound` I/O error to `NotExist`.
pub(crate) fn not_exist(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NotExist
    } else {
        Error::Io(err)
    }
}
