//! Corruption Scan
//!
//! A full, strict read of a closed log used to decide whether a suspect log
//! can be reopened. Unlike the tail recovery done by `Log::open`, every
//! record and every index entry of every segment is decoded and checked.
//!
//! ```text
//! config ─► segment 0 ─► segment 1 ─► ... ─► segment N
//!           records: CRC, size prefix, max record size
//!           index:   CRC, monotonic, within the records file
//!           base(i+1) == end(i) for position and offset
//! ```
//!
//! A torn final record or index entry is tolerated in the last segment
//! only, since that is what a crash mid-append leaves behind.

use std::path::Path;

use styx_core::{Atomic, BufferedReader, IndexEntry, IoMode, RecioError, Record, INDEX_ENTRY_SIZE};
use tracing::{info, warn};

use crate::config::LogConfig;
use crate::error::{not_exist, Error, Result};
use crate::log::Log;
use crate::segment::{list_segments, SegmentDescriptor};
use crate::stat::Stat;

const SCAN_BUFFER_SIZE: usize = 64 * 1024;

/// Where a scanned segment ends.
struct ScannedSegment {
    position: i64,
    offset: i64,
}

impl Log {
    /// Verify a log directory end to end. The log must not be open.
    ///
    /// Returns the stat the log would report after a clean open.
    pub async fn scan(path: impl AsRef<Path>) -> Result<Stat> {
        let path = path.as_ref();
        tokio::fs::metadata(path).await.map_err(not_exist)?;
        let config = LogConfig::load(path).await?;

        let segments = list_segments(path).await?;
        let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
            return Err(Error::corrupt("log has no segments"));
        };

        let mut expected: Option<ScannedSegment> = None;
        for (i, desc) in segments.iter().enumerate() {
            if let Some(prev) = &expected {
                if desc.base_position != prev.position || desc.base_offset != prev.offset {
                    return Err(Error::corrupt(format!(
                        "segment {} starts at ({}, {}) but the previous one ends at ({}, {})",
                        desc.name, desc.base_position, desc.base_offset, prev.position, prev.offset
                    )));
                }
            }
            let is_last = i + 1 == segments.len();
            let scanned = scan_records(path, desc, &config, is_last).await?;
            scan_index(path, desc, &scanned, is_last).await?;
            expected = Some(scanned);
        }

        let end = expected.unwrap_or(ScannedSegment {
            position: last.base_position,
            offset: last.base_offset,
        });
        let stat = Stat {
            start_position: first.base_position,
            start_offset: first.base_offset,
            start_timestamp: first.base_timestamp,
            end_position: end.position,
            end_offset: end.offset,
        };
        info!(
            path = ?path,
            segments = segments.len(),
            end_position = stat.end_position,
            end_offset = stat.end_offset,
            "Log scan clean"
        );
        Ok(stat)
    }
}

async fn scan_records(
    dir: &Path,
    desc: &SegmentDescriptor,
    config: &LogConfig,
    is_last: bool,
) -> Result<ScannedSegment> {
    let file = match tokio::fs::File::open(desc.records_path(dir)).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::corrupt(format!("{} has no records file", desc.name)))
        }
        Err(e) => return Err(e.into()),
    };
    let capacity = SCAN_BUFFER_SIZE.max(config.max_record_size as usize);
    let mut reader = BufferedReader::new(file, capacity, IoMode::Auto);

    let mut record = Record::default();
    let mut position = desc.base_position;
    let mut offset = desc.base_offset;
    loop {
        match reader.read(&mut Atomic(&mut record)).await {
            Ok(n) if n > config.max_record_size as usize => {
                return Err(Error::corrupt(format!(
                    "record at position {} in {} exceeds max record size",
                    position, desc.name
                )));
            }
            Ok(n) => {
                position += 1;
                offset += n as i64;
            }
            Err(RecioError::Eof) => break,
            Err(RecioError::UnexpectedEof) if is_last => {
                warn!(segment = %desc.name, position, "Torn record at end of log");
                break;
            }
            Err(RecioError::Io(e)) => return Err(e.into()),
            Err(_) => {
                return Err(Error::corrupt(format!(
                    "bad record at position {} in {}",
                    position, desc.name
                )));
            }
        }
    }
    Ok(ScannedSegment { position, offset })
}

async fn scan_index(
    dir: &Path,
    desc: &SegmentDescriptor,
    records: &ScannedSegment,
    is_last: bool,
) -> Result<()> {
    let file = match tokio::fs::File::open(desc.index_path(dir)).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::corrupt(format!("{} has no index file", desc.name)))
        }
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufferedReader::new(file, SCAN_BUFFER_SIZE.max(INDEX_ENTRY_SIZE), IoMode::Auto);

    let mut last = IndexEntry::new(desc.base_position, desc.base_offset);
    let mut entry = IndexEntry::default();
    loop {
        match reader.read(&mut Atomic(&mut entry)).await {
            Ok(_) => {
                let ordered = entry.position > last.position && entry.offset > last.offset;
                let inside = entry.position <= records.position && entry.offset <= records.offset;
                if !ordered || !inside {
                    return Err(Error::corrupt(format!(
                        "index entry ({}, {}) out of place in {}",
                        entry.position, entry.offset, desc.name
                    )));
                }
                last = entry;
            }
            Err(RecioError::Eof) => return Ok(()),
            Err(RecioError::UnexpectedEof) if is_last => {
                warn!(segment = %desc.name, "Torn index entry at end of log");
                return Ok(());
            }
            Err(RecioError::Io(e)) => return Err(e.into()),
            Err(_) => {
                return Err(Error::corrupt(format!(
                    "bad index entry after position {} in {}",
                    last.position, desc.name
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    async fn write_log(path: &Path, config: LogConfig, count: usize) {
        let log = Log::create(path, config, Options::default()).await.unwrap();
        let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
        for i in 0..count {
            writer.write(&Record::new(format!("{i:08}"))).await.unwrap();
        }
        writer.close().await.unwrap();
        log.close().await.unwrap();
    }

    fn config() -> LogConfig {
        LogConfig {
            segment_max_count: 5,
            index_after_size: 32,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_clean_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        write_log(&path, config(), 12).await;

        let stat = Log::scan(&path).await.unwrap();
        assert_eq!(stat.start_position, 0);
        assert_eq!(stat.end_position, 12);
        assert_eq!(stat.end_offset, 12 * 16);
    }

    #[tokio::test]
    async fn test_empty_log_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let log = Log::create(&path, LogConfig::default(), Options::default())
            .await
            .unwrap();
        log.close().await.unwrap();

        assert!(Log::scan(&path).await.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn test_bad_checksum_in_middle_segment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        write_log(&path, config(), 12).await;

        let segments = list_segments(&path).await.unwrap();
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(segments[1].records_path(&path))
            .unwrap();
        file.seek(SeekFrom::Start(20)).unwrap();
        file.write_all(&[0xAB]).unwrap();

        assert!(Log::scan(&path).await.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn test_missing_segment_is_a_gap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        write_log(&path, config(), 12).await;

        let segments = list_segments(&path).await.unwrap();
        std::fs::remove_file(segments[1].records_path(&path)).unwrap();
        std::fs::remove_file(segments[1].index_path(&path)).unwrap();

        assert!(Log::scan(&path).await.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn test_torn_tail_in_last_segment_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        write_log(&path, config(), 12).await;

        let segments = list_segments(&path).await.unwrap();
        let last = segments.last().unwrap();
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(last.records_path(&path))
            .unwrap();
        file.write_all(&[0, 0, 0, 8, 1, 2]).unwrap();

        let stat = Log::scan(&path).await.unwrap();
        assert_eq!(stat.end_position, 12);
    }
}
