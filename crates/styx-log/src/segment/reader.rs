//! Segment Reader
//!
//! Reads records from one segment through its own file handles, so any
//! number of readers can share a segment with the writer appending to it.
//!
//! ## Seek
//!
//! ```text
//! seek(target)
//!   1. scan the index for the greatest entry with position <= target
//!      (corrupt entries skipped, a torn tail ends the scan)
//!   2. entry beyond the records file? fall back to the segment base
//!   3. position the records file at entry.offset - baseOffset
//!   4. decode forward until position == target
//! ```

use std::path::{Path, PathBuf};

use styx_core::{
    Atomic, BufferedReader, IndexEntry, IoMode, RecioError, Record, INDEX_ENTRY_SIZE,
};
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tracing::debug;

use super::SegmentDescriptor;
use crate::error::{Error, Result};

pub struct SegmentReader {
    desc: SegmentDescriptor,
    dir: PathBuf,
    records: BufferedReader<File>,
    max_record_size: u32,
    index_buffer_size: usize,
    mode: IoMode,
    position: i64,
    offset: i64,
}

impl SegmentReader {
    /// Open a segment positioned at its first record.
    pub async fn open(
        dir: &Path,
        desc: SegmentDescriptor,
        max_record_size: u32,
        buffer_size: usize,
        index_buffer_size: usize,
        mode: IoMode,
    ) -> Result<Self> {
        let file = File::open(desc.records_path(dir)).await?;
        Ok(Self {
            records: BufferedReader::new(
                file,
                buffer_size.max(max_record_size as usize),
                mode,
            ),
            dir: dir.to_path_buf(),
            max_record_size,
            index_buffer_size,
            mode,
            position: desc.base_position,
            offset: desc.base_offset,
            desc,
        })
    }

    /// Read the next record, returning its on-disk size.
    ///
    /// Returns `Eof` at the end of the data currently in the file and, in
    /// Manual mode, `MustFill` when the buffer needs refilling.
    pub async fn read(&mut self, record: &mut Record) -> Result<usize> {
        let n = match self.records.read(&mut Atomic(&mut *record)).await {
            Ok(n) => n,
            Err(RecioError::Eof) => return Err(Error::Eof),
            Err(RecioError::MustFill) => return Err(Error::MustFill),
            Err(RecioError::UnexpectedEof) => {
                return Err(self.corrupt("record truncated by end of file"))
            }
            Err(RecioError::Corrupt) => return Err(self.corrupt("record checksum or size prefix")),
            Err(RecioError::TooLarge) => return Err(self.corrupt("record larger than buffer")),
            Err(e) => return Err(e.into()),
        };
        if n > self.max_record_size as usize {
            return Err(self.corrupt("record exceeds max record size"));
        }
        self.position += 1;
        self.offset += n as i64;
        Ok(n)
    }

    /// Pull more bytes from the records file into the buffer.
    pub async fn fill(&mut self) -> Result<usize> {
        Ok(self.records.fill().await?)
    }

    /// Position the reader at `target` using the sparse index.
    pub async fn seek(&mut self, target: i64) -> Result<()> {
        if target < self.desc.base_position {
            return Err(Error::OutOfRange);
        }

        let mut start = self.best_index_entry(target).await?;
        let records_len = self.records.get_ref().metadata().await?.len();
        if (start.offset - self.desc.base_offset) as u64 > records_len {
            start = IndexEntry::new(self.desc.base_position, self.desc.base_offset);
        }

        self.records
            .get_mut()
            .seek(std::io::SeekFrom::Start(
                (start.offset - self.desc.base_offset) as u64,
            ))
            .await?;
        self.records.reset();
        self.position = start.position;
        self.offset = start.offset;

        let mut record = Record::default();
        while self.position < target {
            match self.records.read(&mut Atomic(&mut record)).await {
                Ok(n) => {
                    self.position += 1;
                    self.offset += n as i64;
                }
                Err(RecioError::MustFill) => {
                    self.records.fill().await?;
                }
                Err(RecioError::Eof) => return Err(Error::OutOfRange),
                Err(RecioError::Io(e)) => return Err(e.into()),
                Err(_) => return Err(self.corrupt("bad record while seeking")),
            }
        }

        debug!(
            segment = %self.desc.name,
            target,
            from_position = start.position,
            "Segment seek complete"
        );
        Ok(())
    }

    /// Greatest valid index entry at or before `target`, or the segment
    /// base. Best-effort: corrupt entries are skipped and a torn or missing
    /// index ends the scan.
    async fn best_index_entry(&self, target: i64) -> Result<IndexEntry> {
        let mut best = IndexEntry::new(self.desc.base_position, self.desc.base_offset);
        let file = match File::open(self.desc.index_path(&self.dir)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(best),
            Err(e) => return Err(e.into()),
        };
        let mut index = BufferedReader::new(
            file,
            self.index_buffer_size.max(INDEX_ENTRY_SIZE),
            IoMode::Auto,
        );

        let mut entry = IndexEntry::default();
        loop {
            match index.read(&mut Atomic(&mut entry)).await {
                Ok(_) => {
                    if entry.position <= target
                        && entry.position >= best.position
                        && entry.offset >= best.offset
                    {
                        best = entry;
                    }
                }
                Err(RecioError::Corrupt) => {
                    index.discard(INDEX_ENTRY_SIZE);
                }
                Err(RecioError::Io(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }
        Ok(best)
    }

    fn corrupt(&self, what: &str) -> Error {
        Error::corrupt(format!(
            "{} at position {} in {}",
            what, self.position, self.desc.name
        ))
    }

    pub fn descriptor(&self) -> &SegmentDescriptor {
        &self.desc
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn mode(&self) -> IoMode {
        self.mode
    }
}
