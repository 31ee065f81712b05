//! Log Configuration
//!
//! Two kinds of configuration apply to a log:
//!
//! - [`LogConfig`]: persistent limits, stored bit-exact in `<log>/config`
//!   and fixed for the lifetime of the log.
//! - [`Options`]: per-open runtime knobs (clock, sync lock, timings) that
//!   are never written to disk.
//!
//! ## Config File Layout
//!
//! 72 bytes, big-endian:
//!
//! ```text
//! ┌─────────┬───────────────┬────────────────────────────────────┬──────────┬────────┐
//! │ version │ MaxRecordSize │ 7 x i64 limits                      │ reserved │ crc32c │
//! │ u32     │ u32           │ IndexAfterSize, SegmentMax{Count,   │ u32 = 0  │ u32    │
//! │         │               │ Size,Age}, LogMax{Count,Size,Age}   │          │        │
//! └─────────┴───────────────┴────────────────────────────────────┴──────────┴────────┘
//! ```
//!
//! The CRC covers the first 68 bytes. A limit of `-1` means unlimited.
//! Ages are in seconds.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::{not_exist, Error, Result};
use crate::syncer::SyncLock;

/// Name of the config file inside a log directory.
pub const CONFIG_FILE: &str = "config";

/// Size of the config file in bytes.
pub const CONFIG_SIZE: usize = 72;

/// Config format version understood by this engine.
pub const CONFIG_VERSION: u32 = 0;

/// Limit value meaning "no limit".
pub const UNLIMITED: i64 = -1;

const CRC_OFFSET: usize = CONFIG_SIZE - 4;

/// Persistent per-log limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Hard ceiling on one record including size prefix and CRC (default: 1MiB)
    #[serde(default = "default_max_record_size")]
    pub max_record_size: u32,

    /// Emit an index entry every this many bytes (default: 1MiB)
    #[serde(default = "default_index_after_size")]
    pub index_after_size: i64,

    /// Roll after this many records per segment (default: unlimited)
    #[serde(default = "default_unlimited")]
    pub segment_max_count: i64,

    /// Roll before a segment exceeds this many bytes (default: 1GiB)
    #[serde(default = "default_segment_max_size")]
    pub segment_max_size: i64,

    /// Roll once a segment is this many seconds old (default: unlimited)
    #[serde(default = "default_unlimited")]
    pub segment_max_age: i64,

    /// Keep at most this many records (default: unlimited)
    #[serde(default = "default_unlimited")]
    pub log_max_count: i64,

    /// Keep at most this many bytes (default: unlimited)
    #[serde(default = "default_unlimited")]
    pub log_max_size: i64,

    /// Expire segments older than this many seconds (default: unlimited)
    #[serde(default = "default_unlimited")]
    pub log_max_age: i64,
}

fn default_max_record_size() -> u32 {
    1024 * 1024 // 1MiB
}

fn default_index_after_size() -> i64 {
    1024 * 1024 // 1MiB
}

fn default_segment_max_size() -> i64 {
    1024 * 1024 * 1024 // 1GiB
}

fn default_unlimited() -> i64 {
    UNLIMITED
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_record_size: default_max_record_size(),
            index_after_size: default_index_after_size(),
            segment_max_count: default_unlimited(),
            segment_max_size: default_segment_max_size(),
            segment_max_age: default_unlimited(),
            log_max_count: default_unlimited(),
            log_max_size: default_unlimited(),
            log_max_age: default_unlimited(),
        }
    }
}

impl LogConfig {
    /// Reject limits the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        // size prefix + CRC
        if self.max_record_size < 8 {
            return Err(Error::InvalidConfig(format!(
                "max_record_size {} is below the 8 byte record overhead",
                self.max_record_size
            )));
        }
        if self.index_after_size <= 0 {
            return Err(Error::InvalidConfig(format!(
                "index_after_size must be positive, got {}",
                self.index_after_size
            )));
        }
        let limits = [
            ("segment_max_count", self.segment_max_count),
            ("segment_max_size", self.segment_max_size),
            ("segment_max_age", self.segment_max_age),
            ("log_max_count", self.log_max_count),
            ("log_max_size", self.log_max_size),
            ("log_max_age", self.log_max_age),
        ];
        for (name, value) in limits {
            if value != UNLIMITED && value <= 0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be positive or -1, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Encode to the 72-byte on-disk form.
    pub fn encode(&self) -> [u8; CONFIG_SIZE] {
        let mut out = [0u8; CONFIG_SIZE];
        {
            let mut buf = &mut out[..];
            buf.put_u32(CONFIG_VERSION);
            buf.put_u32(self.max_record_size);
            buf.put_i64(self.index_after_size);
            buf.put_i64(self.segment_max_count);
            buf.put_i64(self.segment_max_size);
            buf.put_i64(self.segment_max_age);
            buf.put_i64(self.log_max_count);
            buf.put_i64(self.log_max_size);
            buf.put_i64(self.log_max_age);
            buf.put_u32(0);
        }
        let crc = crc32c::crc32c(&out[..CRC_OFFSET]);
        out[CRC_OFFSET..].copy_from_slice(&crc.to_be_bytes());
        out
    }

    /// Decode and verify the on-disk form.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != CONFIG_SIZE {
            return Err(Error::corrupt(format!(
                "config is {} bytes, expected {}",
                data.len(),
                CONFIG_SIZE
            )));
        }
        let stored = u32::from_be_bytes([data[68], data[69], data[70], data[71]]);
        if stored != crc32c::crc32c(&data[..CRC_OFFSET]) {
            return Err(Error::corrupt("config checksum mismatch"));
        }

        let mut buf = data;
        let version = buf.get_u32();
        if version != CONFIG_VERSION {
            return Err(Error::BadVersion(version));
        }

        Ok(Self {
            max_record_size: buf.get_u32(),
            index_after_size: buf.get_i64(),
            segment_max_count: buf.get_i64(),
            segment_max_size: buf.get_i64(),
            segment_max_age: buf.get_i64(),
            log_max_count: buf.get_i64(),
            log_max_size: buf.get_i64(),
            log_max_age: buf.get_i64(),
        })
    }

    /// Load `<dir>/config`.
    pub async fn load(dir: &Path) -> Result<Self> {
        let data = tokio::fs::read(dir.join(CONFIG_FILE))
            .await
            .map_err(not_exist)?;
        Self::decode(&data)
    }

    /// Write `<dir>/config` and fsync it. Fails if the file exists.
    pub(crate) async fn store(&self, dir: &Path) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(CONFIG_FILE))
            .await?;
        file.write_all(&self.encode()).await?;
        file.sync_all().await?;
        Ok(())
    }

    pub(crate) fn limited(value: i64) -> bool {
        value != UNLIMITED
    }
}

/// Runtime options for opening a log.
#[derive(Clone)]
pub struct Options {
    /// Time source for segment timestamps and age limits
    pub clock: Arc<dyn Clock>,

    /// Serialises fsync calls; shared process-wide by default
    pub sync_lock: Arc<SyncLock>,

    /// How often the age expirer runs (default: 1s)
    pub expire_interval: Duration,

    /// Dirty segments after which `flush` waits for the syncer (default: 5)
    pub max_dirty_segments: usize,

    /// Buffer size for index readers and writers (default: 4KiB)
    pub index_buffer_size: usize,

    /// Remove a stale lock file instead of failing with `Orphaned`
    pub clear_orphaned_lock: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            sync_lock: SyncLock::global(),
            expire_interval: Duration::from_secs(1),
            max_dirty_segments: 5,
            index_buffer_size: 4096,
            clear_orphaned_lock: false,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("expire_interval", &self.expire_interval)
            .field("max_dirty_segments", &self.max_dirty_segments)
            .field("index_buffer_size", &self.index_buffer_size)
            .field("clear_orphaned_lock", &self.clear_orphaned_lock)
            .finish_non_exhaustive()
    }
}
