//! Buffered Record I/O
//!
//! [`BufferedWriter`] and [`BufferedReader`] move [`Encode`](crate::Encode) /
//! [`Decode`](crate::Decode) values through a fixed-size buffer in front of
//! a tokio byte sink or source.
//!
//! ## I/O Modes
//!
//! - **Auto**: the writer flushes when a value does not fit, the reader
//!   refills when a value is incomplete. Callers only see values.
//! - **Manual**: the writer returns [`RecioError::MustFlush`] and the reader
//!   returns [`RecioError::MustFill`] instead of touching the endpoint. The
//!   caller decides when to call `flush()` / `fill()`, which lets it order
//!   I/O across two endpoints (flush a sink before blocking on a source).
//!
//! Values are placed atomically: a write either lands entirely in the buffer
//! or leaves it untouched, and a read either consumes a whole value or
//! nothing.
//!
//! [`RecioError::MustFlush`]: crate::RecioError::MustFlush
//! [`RecioError::MustFill`]: crate::RecioError::MustFill

mod reader;
mod writer;

pub use reader::BufferedReader;
pub use writer::BufferedWriter;

/// How buffered I/O reacts when the buffer needs servicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    #[default]
    Auto,
    Manual,
}
