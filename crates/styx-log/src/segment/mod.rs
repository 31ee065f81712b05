//! Segment Storage Format
//!
//! A log is stored as an ordered set of segments. Each segment is a pair of
//! append-only files sharing a base name:
//!
//! ```text
//! segment-<basePosition:020>-<baseOffset:020>-<baseTimestamp:020>-records
//! segment-<basePosition:020>-<baseOffset:020>-<baseTimestamp:020>-index
//! ```
//!
//! ## Records File
//!
//! ```text
//! [size: i32 BE][payload: size bytes][crc32c: u32 BE]  (repeated)
//! ```
//!
//! ## Index File
//!
//! A sparse list of `(position, offset)` pairs, one emitted each time at
//! least `IndexAfterSize` bytes of records were written since the last one:
//!
//! ```text
//! [position: i64 BE][offset: i64 BE][crc32c: u32 BE]  (repeated)
//! ```
//!
//! Offsets in the index are log offsets, not file offsets: the file offset
//! of a record is `offset - baseOffset`.
//!
//! ## Contiguity
//!
//! Segments never overlap or leave gaps: the base of segment `i + 1` is the
//! position and offset one past the last record of segment `i`. Only the
//! last segment grows.

pub mod reader;
pub mod writer;

use std::path::{Path, PathBuf};

use styx_core::{Atomic, BufferedReader, IndexEntry, IoMode, RecioError, Record, INDEX_ENTRY_SIZE};
use tokio::io::AsyncSeekExt;
use tracing::warn;

use crate::error::{Error, Result};

pub use reader::SegmentReader;
pub use writer::SegmentWriter;

const PREFIX: &str = "segment-";
const RECORDS_SUFFIX: &str = "-records";
const INDEX_SUFFIX: &str = "-index";

/// In-memory description of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub name: String,
    pub base_position: i64,
    pub base_offset: i64,
    pub base_timestamp: i64,
    /// Flushed since the last fsync
    pub dirty: bool,
}

impl SegmentDescriptor {
    pub fn new(base_position: i64, base_offset: i64, base_timestamp: i64) -> Self {
        Self {
            name: segment_name(base_position, base_offset, base_timestamp),
            base_position,
            base_offset,
            base_timestamp,
            dirty: false,
        }
    }

    /// Parse a `segment-P-O-T` base name.
    pub fn parse(name: &str) -> Option<Self> {
        let fields = name.strip_prefix(PREFIX)?;
        let mut parts = fields.split('-');
        let position = parse_field(parts.next()?)?;
        let offset = parse_field(parts.next()?)?;
        let timestamp = parse_field(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            base_position: position,
            base_offset: offset,
            base_timestamp: timestamp,
            dirty: false,
        })
    }

    pub fn records_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.name, RECORDS_SUFFIX))
    }

    pub fn index_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.name, INDEX_SUFFIX))
    }

    pub fn records_file_name(&self) -> String {
        format!("{}{}", self.name, RECORDS_SUFFIX)
    }

    pub fn index_file_name(&self) -> String {
        format!("{}{}", self.name, INDEX_SUFFIX)
    }
}

fn parse_field(field: &str) -> Option<i64> {
    if field.len() != 20 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

pub fn segment_name(base_position: i64, base_offset: i64, base_timestamp: i64) -> String {
    format!(
        "{}{:020}-{:020}-{:020}",
        PREFIX, base_position, base_offset, base_timestamp
    )
}

/// True for file names that belong to a segment (records or index).
pub fn is_segment_file(file_name: &str) -> bool {
    let base = file_name
        .strip_suffix(RECORDS_SUFFIX)
        .or_else(|| file_name.strip_suffix(INDEX_SUFFIX));
    base.and_then(SegmentDescriptor::parse).is_some()
}

/// Discover segments by their records files, ordered by base position.
pub async fn list_segments(dir: &Path) -> Result<Vec<SegmentDescriptor>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut segments = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if let Some(base) = name.strip_suffix(RECORDS_SUFFIX) {
            if let Some(desc) = SegmentDescriptor::parse(base) {
                segments.push(desc);
            }
        }
    }
    segments.sort_by_key(|s| (s.base_position, s.base_offset));
    Ok(segments)
}

/// Where the valid data of a segment ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEnd {
    /// Position one past the last valid record
    pub position: i64,
    /// Offset one past the last valid record
    pub offset: i64,
    /// Length of the records file on disk
    pub records_len: u64,
    /// Valid index entries, in file order
    pub index: Vec<IndexEntry>,
    /// Length of the index file on disk
    pub index_len: u64,
}

impl SegmentEnd {
    /// Bytes of the records file that hold whole records.
    pub fn valid_records_len(&self, base_offset: i64) -> u64 {
        (self.offset - base_offset) as u64
    }

    pub fn valid_index_len(&self) -> u64 {
        (self.index.len() * INDEX_ENTRY_SIZE) as u64
    }

    pub fn is_torn(&self, base_offset: i64) -> bool {
        self.records_len != self.valid_records_len(base_offset)
            || self.index_len != self.valid_index_len()
    }
}

/// Read the index of a segment, keeping the prefix of well-formed entries.
///
/// Reading stops at the first torn, corrupt, or out-of-order entry; the
/// index is only an accelerator, so anything after that point is dropped.
pub async fn read_index(
    desc: &SegmentDescriptor,
    dir: &Path,
    buffer_size: usize,
) -> Result<(Vec<IndexEntry>, u64)> {
    let file = match tokio::fs::File::open(desc.index_path(dir)).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();
    let mut reader = BufferedReader::new(file, buffer_size.max(INDEX_ENTRY_SIZE), IoMode::Auto);

    let mut entries: Vec<IndexEntry> = Vec::new();
    let mut entry = IndexEntry::default();
    loop {
        match reader.read(&mut Atomic(&mut entry)).await {
            Ok(_) => {
                let last = entries
                    .last()
                    .copied()
                    .unwrap_or(IndexEntry::new(desc.base_position, desc.base_offset));
                if entry.position <= last.position || entry.offset <= last.offset {
                    break;
                }
                entries.push(entry);
            }
            Err(RecioError::Eof) => break,
            Err(RecioError::UnexpectedEof) | Err(RecioError::Corrupt) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok((entries, len))
}

/// Find the end of a segment by scanning records from its last usable
/// index entry.
///
/// A record cut short by the end of the file (a torn write) ends the scan
/// without error. A bad checksum, bad size prefix, or a record larger than
/// `max_record_size` is `Corrupt`.
pub async fn find_end(
    desc: &SegmentDescriptor,
    dir: &Path,
    max_record_size: u32,
    index_buffer_size: usize,
) -> Result<SegmentEnd> {
    let (mut index, index_len) = read_index(desc, dir, index_buffer_size).await?;

    let mut file = tokio::fs::File::open(desc.records_path(dir)).await?;
    let records_len = file.metadata().await?.len();

    // Entries that point past the records file are unusable
    while let Some(last) = index.last() {
        if (last.offset - desc.base_offset) as u64 > records_len {
            index.pop();
        } else {
            break;
        }
    }

    let start = index
        .last()
        .copied()
        .unwrap_or(IndexEntry::new(desc.base_position, desc.base_offset));
    file.seek(std::io::SeekFrom::Start((start.offset - desc.base_offset) as u64))
        .await?;

    let mut reader = BufferedReader::new(file, max_record_size as usize, IoMode::Auto);
    let mut record = Record::default();
    let mut position = start.position;
    let mut offset = start.offset;
    loop {
        match reader.read(&mut Atomic(&mut record)).await {
            Ok(n) => {
                if n > max_record_size as usize {
                    return Err(Error::corrupt(format!(
                        "record at position {} in {} exceeds max record size",
                        position, desc.name
                    )));
                }
                position += 1;
                offset += n as i64;
            }
            Err(RecioError::Eof) => break,
            Err(RecioError::UnexpectedEof) => {
                warn!(
                    segment = %desc.name,
                    position,
                    offset,
                    "Torn record at end of segment"
                );
                break;
            }
            Err(RecioError::Corrupt) | Err(RecioError::TooLarge) => {
                return Err(Error::corrupt(format!(
                    "bad record at position {} in {}",
                    position, desc.name
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(SegmentEnd {
        position,
        offset,
        records_len,
        index,
        index_len,
    })
}
