//! Styx Core
//!
//! The leaf layer of the Styx log engine: the binary codecs that define what
//! a record and an index entry look like on disk, and the buffered I/O that
//! moves those values between memory and files.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ BufferedReader/BufferedWriter│  recio: fixed buffer, Auto/Manual I/O
//! └──────────────┬───────────────┘
//!                │ Encode / Decode
//! ┌──────────────▼───────────────┐
//! │        Atomic<C>             │  appends/verifies CRC32-C trailer
//! └──────────────┬───────────────┘
//!                │
//! ┌──────────────▼───────────────┐
//! │   Record      IndexEntry     │  length-prefixed payload, (pos, off) pair
//! └──────────────────────────────┘
//! ```
//!
//! Nothing in this crate knows about segments, directories or logs; that
//! lives in `styx-log`.

pub mod atomic;
pub mod codec;
pub mod error;
pub mod index;
pub mod recio;
pub mod record;

pub use atomic::{Atomic, CRC_SIZE};
pub use codec::{Decode, Encode};
pub use error::{CodecError, RecioError};
pub use index::{IndexEntry, INDEX_ENTRY_SIZE};
pub use recio::{BufferedReader, BufferedWriter, IoMode};
pub use record::{Record, MAX_PAYLOAD_SIZE};
