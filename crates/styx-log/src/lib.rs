//! Styx Log
//!
//! A persistent, append-only record log: segmented, CRC-protected, with
//! sparse-index seek, following readers, a single durable writer shared
//! through [`Fanin`], retention, and consistent online backup.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  LogManager  │  name → log, status, scans, metrics
//!                      └──────┬───────┘
//!                             │
//!   FaninWriter ×N ──► Fanin ─┤            LogReader ×N
//!                             ▼                 ▲
//!                      ┌──────────────┐         │ Stat (watch)
//!                      │     Log      │─────────┘
//!                      │ config, lock │
//!                      │ segments     │◄── expirer task (age retention)
//!                      └──────┬───────┘
//!                             │
//!            LogWriter ───────┤──► syncer task (fsync, SyncEvent)
//!                             ▼
//!         segment-…-records / segment-…-index  (styx-core codecs)
//! ```
//!
//! ## Durability
//!
//! `write` buffers, `flush` hands bytes to the OS, and the syncer fsyncs
//! them and advances the synced end. Readers only ever see records below
//! the synced end, so nothing a reader returns can be lost in a crash.
//!
//! ## Example
//!
//! ```no_run
//! use styx_log::{IoMode, Log, LogConfig, Options, Record};
//!
//! # async fn example() -> styx_log::Result<()> {
//! let log = Log::create("/tmp/orders", LogConfig::default(), Options::default()).await?;
//!
//! let mut writer = log.new_writer(64 * 1024, IoMode::Auto).await?;
//! writer.write(&Record::new(b"hello")).await?;
//! writer.sync().await?;
//!
//! let mut reader = log.new_reader(64 * 1024, false, IoMode::Auto).await?;
//! let mut record = Record::default();
//! reader.read(&mut record).await?;
//!
//! writer.close().await?;
//! log.close().await?;
//! # Ok(())
//! # }
//! ```

mod backup;
pub mod clock;
pub mod config;
pub mod error;
mod expirer;
pub mod fanin;
mod fs;
pub mod lock;
pub mod log;
pub mod manager;
pub mod reader;
mod scan;
pub mod segment;
pub mod stat;
pub mod syncer;
pub mod writer;

pub use clock::{Clock, CoarseClock, ManualClock, SystemClock};
pub use config::{LogConfig, Options, CONFIG_FILE, CONFIG_SIZE, UNLIMITED};
pub use error::{Error, Result};
pub use fanin::{Fanin, FaninWriter};
pub use log::Log;
pub use manager::{LogManager, ManagerConfig, Status};
pub use reader::{LogReader, Whence};
pub use segment::SegmentDescriptor;
pub use stat::Stat;
pub use syncer::{SyncEvent, SyncHandler, SyncLock};
pub use writer::LogWriter;

pub use styx_core::{IoMode, Record};
