//! Segment Writer
//!
//! Appends CRC-wrapped records to the active segment and maintains its
//! sparse index.
//!
//! ## Write Path
//!
//! ```text
//! write(record)
//!   ├─ encoded + CRC > MaxRecordSize?          → RecordTooLarge
//!   ├─ segment non-empty and a limit is hit?   → SegmentFull (caller rolls)
//!   ├─ records buffer (Manual mode)            → MustFlush if full
//!   └─ IndexAfterSize bytes since last entry?  → append index entry
//! ```
//!
//! Per-segment limits only apply once the segment holds a record, so a
//! fresh segment always accepts its first record and rolling cannot loop.
//!
//! ## Recovery
//!
//! Opening an existing segment runs [`find_end`](super::find_end) and cuts
//! any torn tail off both files, so appends resume right after the last
//! valid record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use styx_core::{Atomic, BufferedWriter, Encode, IndexEntry, IoMode, Record, CRC_SIZE, INDEX_ENTRY_SIZE};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncSeekExt;
use tracing::{debug, warn};

use super::{find_end, SegmentDescriptor};
use crate::clock::Clock;
use crate::config::LogConfig;
use crate::error::{Error, Result};

pub struct SegmentWriter {
    desc: SegmentDescriptor,
    dir: PathBuf,
    config: LogConfig,
    clock: Arc<dyn Clock>,
    records: BufferedWriter<File>,
    index: BufferedWriter<File>,
    position: i64,
    offset: i64,
    last_index: IndexEntry,
}

impl SegmentWriter {
    /// Create a new, empty segment.
    pub async fn create(
        dir: &Path,
        desc: SegmentDescriptor,
        config: LogConfig,
        clock: Arc<dyn Clock>,
        buffer_size: usize,
        index_buffer_size: usize,
    ) -> Result<Self> {
        let records = create_new(&desc.records_path(dir)).await?;
        let index = create_new(&desc.index_path(dir)).await?;

        debug!(segment = %desc.name, "Segment created");

        let base = IndexEntry::new(desc.base_position, desc.base_offset);
        Ok(Self {
            records: BufferedWriter::new(
                records,
                buffer_size.max(config.max_record_size as usize),
                IoMode::Manual,
            ),
            index: BufferedWriter::new(index, index_buffer_size.max(INDEX_ENTRY_SIZE), IoMode::Manual),
            dir: dir.to_path_buf(),
            config,
            clock,
            position: base.position,
            offset: base.offset,
            last_index: base,
            desc,
        })
    }

    /// Open an existing segment for appending, truncating a torn tail.
    pub async fn open(
        dir: &Path,
        desc: SegmentDescriptor,
        config: LogConfig,
        clock: Arc<dyn Clock>,
        buffer_size: usize,
        index_buffer_size: usize,
    ) -> Result<Self> {
        let end = find_end(&desc, dir, config.max_record_size, index_buffer_size).await?;

        let mut records = open_rw(&desc.records_path(dir)).await?;
        let mut index = open_rw(&desc.index_path(dir)).await?;

        if end.is_torn(desc.base_offset) {
            warn!(
                segment = %desc.name,
                records_len = end.records_len,
                valid_records_len = end.valid_records_len(desc.base_offset),
                index_len = end.index_len,
                valid_index_len = end.valid_index_len(),
                "Truncating torn segment tail"
            );
            records.set_len(end.valid_records_len(desc.base_offset)).await?;
            index.set_len(end.valid_index_len()).await?;
            records.sync_all().await?;
            index.sync_all().await?;
        }
        records.seek(std::io::SeekFrom::End(0)).await?;
        index.seek(std::io::SeekFrom::End(0)).await?;

        let last_index = end
            .index
            .last()
            .copied()
            .unwrap_or(IndexEntry::new(desc.base_position, desc.base_offset));

        debug!(
            segment = %desc.name,
            position = end.position,
            offset = end.offset,
            "Segment opened for append"
        );

        Ok(Self {
            records: BufferedWriter::new(
                records,
                buffer_size.max(config.max_record_size as usize),
                IoMode::Manual,
            ),
            index: BufferedWriter::new(index, index_buffer_size.max(INDEX_ENTRY_SIZE), IoMode::Manual),
            dir: dir.to_path_buf(),
            config,
            clock,
            position: end.position,
            offset: end.offset,
            last_index,
            desc,
        })
    }

    /// Append one record, returning its on-disk size.
    pub async fn write(&mut self, record: &Record) -> Result<usize> {
        let record_size = record.encoded_size() + CRC_SIZE;
        if record.len() > styx_core::MAX_PAYLOAD_SIZE
            || record_size > self.config.max_record_size as usize
        {
            return Err(Error::RecordTooLarge);
        }
        self.check_limits(record_size as i64)?;

        let next_offset = self.offset + record_size as i64;
        let needs_index = next_offset - self.last_index.offset >= self.config.index_after_size;
        if needs_index && self.index.available() < INDEX_ENTRY_SIZE {
            return Err(Error::MustFlush);
        }

        let n = self.records.write(&Atomic(record)).await?;
        self.position += 1;
        self.offset += n as i64;

        if needs_index {
            let entry = IndexEntry::new(self.position, self.offset);
            self.index.write(&Atomic(&entry)).await?;
            self.last_index = entry;
        }
        Ok(n)
    }

    fn check_limits(&self, record_size: i64) -> Result<()> {
        if self.position == self.desc.base_position {
            return Ok(());
        }
        let config = &self.config;
        if LogConfig::limited(config.segment_max_count)
            && self.position - self.desc.base_position + 1 > config.segment_max_count
        {
            return Err(Error::SegmentFull);
        }
        if LogConfig::limited(config.segment_max_size)
            && self.offset - self.desc.base_offset + record_size > config.segment_max_size
        {
            return Err(Error::SegmentFull);
        }
        if LogConfig::limited(config.segment_max_age)
            && self.clock.now_unix() - self.desc.base_timestamp >= config.segment_max_age
        {
            return Err(Error::SegmentFull);
        }
        Ok(())
    }

    /// Hand buffered records and index entries to the OS. No fsync.
    pub async fn flush(&mut self) -> Result<()> {
        self.records.flush().await?;
        self.index.flush().await?;
        Ok(())
    }

    /// Flush and close the segment.
    pub async fn close(mut self) -> Result<()> {
        self.flush().await?;
        debug!(
            segment = %self.desc.name,
            dir = ?self.dir,
            position = self.position,
            "Segment closed"
        );
        Ok(())
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

    pub fn is_empty(&self) -> bool {
        self.position == self.desc.base_position
    }
}

async fn create_new(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    Ok(file)
}

async fn open_rw(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .await?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::segment::read_index;
    use tempfile::TempDir;

    fn clock() -> Arc<dyn Clock> {
        ManualClock::new(1_000)
    }

    async fn new_writer(dir: &Path, config: LogConfig) -> SegmentWriter {
        SegmentWriter::create(dir, SegmentDescriptor::new(0, 0, 1_000), config, clock(), 4096, 256)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_advances_position_and_offset() {
        let dir = TempDir::new().unwrap();
        let mut writer = new_writer(dir.path(), LogConfig::default()).await;

        for _ in 0..10 {
            assert_eq!(writer.write(&Record::new([0u8; 100])).await.unwrap(), 108);
        }
        writer.flush().await.unwrap();

        assert_eq!(writer.position(), 10);
        assert_eq!(writer.offset(), 1080);
        let len = std::fs::metadata(writer.descriptor().records_path(dir.path()))
            .unwrap()
            .len();
        assert_eq!(len, 1080);
    }

    #[tokio::test]
    async fn test_record_too_large() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig {
            max_record_size: 64,
            ..Default::default()
        };
        let mut writer = new_writer(dir.path(), config).await;

        assert!(writer.write(&Record::new([0u8; 56])).await.is_ok());
        assert!(matches!(
            writer.write(&Record::new([0u8; 57])).await,
            Err(Error::RecordTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_segment_full_on_count() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig {
            segment_max_count: 3,
            ..Default::default()
        };
        let mut writer = new_writer(dir.path(), config).await;
        for _ in 0..3 {
            writer.write(&Record::new(b"x")).await.unwrap();
        }
        assert!(matches!(
            writer.write(&Record::new(b"x")).await,
            Err(Error::SegmentFull)
        ));
    }

    #[tokio::test]
    async fn test_segment_full_on_size_but_first_record_always_fits() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig {
            segment_max_size: 50,
            ..Default::default()
        };
        let mut writer = new_writer(dir.path(), config).await;

        // Larger than the segment limit, accepted because the segment is empty
        writer.write(&Record::new([1u8; 92])).await.unwrap();
        assert!(matches!(
            writer.write(&Record::new(b"y")).await,
            Err(Error::SegmentFull)
        ));
    }

    #[tokio::test]
    async fn test_segment_full_on_age() {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(1_000);
        let config = LogConfig {
            segment_max_age: 60,
            ..Default::default()
        };
        let mut writer = SegmentWriter::create(
            dir.path(),
            SegmentDescriptor::new(0, 0, 1_000),
            config,
            clock.clone(),
            4096,
            256,
        )
        .await
        .unwrap();

        writer.write(&Record::new(b"a")).await.unwrap();
        clock.advance(59);
        writer.write(&Record::new(b"b")).await.unwrap();
        clock.advance(1);
        assert!(matches!(
            writer.write(&Record::new(b"c")).await,
            Err(Error::SegmentFull)
        ));
    }

    #[tokio::test]
    async fn test_must_flush_when_buffer_full() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig {
            max_record_size: 64,
            ..Default::default()
        };
        let mut writer = SegmentWriter::create(
            dir.path(),
            SegmentDescriptor::new(0, 0, 0),
            config,
            clock(),
            64,
            256,
        )
        .await
        .unwrap();

        writer.write(&Record::new([0u8; 40])).await.unwrap();
        assert!(matches!(
            writer.write(&Record::new([0u8; 40])).await,
            Err(Error::MustFlush)
        ));
        assert_eq!(writer.position(), 1);

        writer.flush().await.unwrap();
        writer.write(&Record::new([0u8; 40])).await.unwrap();
        assert_eq!(writer.position(), 2);
    }

    #[tokio::test]
    async fn test_sparse_index_entries() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig {
            index_after_size: 250,
            ..Default::default()
        };
        let mut writer = new_writer(dir.path(), config).await;
        for _ in 0..10 {
            writer.write(&Record::new([0u8; 92])).await.unwrap();
        }
        writer.flush().await.unwrap();

        let desc = writer.descriptor().clone();
        let (entries, len) = read_index(&desc, dir.path(), 256).await.unwrap();
        assert_eq!(len, 3 * 20);
        assert_eq!(
            entries,
            vec![
                IndexEntry::new(3, 300),
                IndexEntry::new(6, 600),
                IndexEntry::new(9, 900)
            ]
        );
    }

    #[tokio::test]
    async fn test_reopen_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let mut writer = new_writer(dir.path(), LogConfig::default()).await;
        for _ in 0..5 {
            writer.write(&Record::new([7u8; 10])).await.unwrap();
        }
        writer.close().await.unwrap();

        let desc = SegmentDescriptor::new(0, 0, 1_000);
        let path = desc.records_path(dir.path());
        // Simulate a crash in the middle of the fifth record
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(4 * 18 + 7).unwrap();
        drop(file);

        let mut writer = SegmentWriter::open(dir.path(), desc, LogConfig::default(), clock(), 4096, 256)
            .await
            .unwrap();
        assert_eq!(writer.position(), 4);
        assert_eq!(writer.offset(), 72);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 72);

        writer.write(&Record::new([8u8; 10])).await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 90);
    }

    #[tokio::test]
    async fn test_reopen_rejects_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let mut writer = new_writer(dir.path(), LogConfig::default()).await;
        for _ in 0..3 {
            writer.write(&Record::new([7u8; 10])).await.unwrap();
        }
        writer.close().await.unwrap();

        let desc = SegmentDescriptor::new(0, 0, 1_000);
        let path = desc.records_path(dir.path());
        let mut data = std::fs::read(&path).unwrap();
        data[20] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let result = SegmentWriter::open(dir.path(), desc, LogConfig::default(), clock(), 4096, 256).await;
        assert!(matches!(result, Err(Error::Corrupt(_))));
    }
}
