//! Log Core
//!
//! A [`Log`] is a directory of segments plus a `config` file and a `lock`
//! file. It owns the segment descriptors and the flushed/synced boundaries,
//! hands out the single [`LogWriter`] and any number of [`LogReader`]s, and
//! publishes [`Stat`] changes to subscribers.
//!
//! ## Directory Layout
//!
//! ```text
//! <log>/
//! ├── config                                   72-byte LogConfig
//! ├── lock                                     PID of the holder, flock'ed
//! ├── segment-<pos>-<off>-<ts>-records
//! ├── segment-<pos>-<off>-<ts>-index
//! └── ...
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! Log::create / Log::open ──► live ──► Log::close
//!        │                     │
//!        │                     ├── expirer task (age retention, 1/s)
//!        │                     ├── LogWriter (0 or 1) ── syncer task
//!        │                     └── LogReader (0..n)
//!        └── takes the directory lock; close releases it
//! ```
//!
//! `Log` is a cheap handle: clones share the same open log.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use styx_core::IoMode;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{LogConfig, Options};
use crate::error::{not_exist, Error, Result};
use crate::expirer;
use crate::fs::{sync_dir, sync_parent};
use crate::lock::{self, DirLock};
use crate::reader::LogReader;
use crate::segment::{self, find_end, list_segments, SegmentDescriptor};
use crate::stat::{LogState, Stat};
use crate::writer::{LogWriter, WriterCore};

/// Handle to an open log.
#[derive(Clone)]
pub struct Log {
    inner: Arc<LogInner>,
}

pub(crate) struct LogInner {
    pub path: PathBuf,
    pub config: LogConfig,
    pub options: Options,
    pub state: Mutex<LogState>,
    pub write_lock: Arc<tokio::sync::Mutex<()>>,
    writer: Mutex<Weak<WriterCore>>,
    stat_tx: Mutex<Option<watch::Sender<Stat>>>,
    dir_lock: Mutex<Option<DirLock>>,
    expirer: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    closed: AtomicBool,
}

impl Drop for LogInner {
    fn drop(&mut self) {
        if let Some((token, handle)) = self.expirer.get_mut().take() {
            token.cancel();
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Log {
    // ========================================================================
    // Directory operations
    // ========================================================================

    /// Create a new log directory at `path`.
    ///
    /// Fails with `Exist` if anything is already there.
    pub async fn create(path: impl AsRef<Path>, config: LogConfig, options: Options) -> Result<Log> {
        let path = path.as_ref().to_path_buf();
        config.validate()?;

        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Err(Error::Exist),
            Err(e) => return Err(e.into()),
        }

        let dir_lock = match Self::initialize(&path, &config).await {
            Ok(dir_lock) => dir_lock,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&path).await {
                    warn!(path = ?path, error = %cleanup, "Failed to remove partially created log");
                }
                return Err(e);
            }
        };

        info!(path = ?path, config = ?config, "Log created");
        Ok(Self::start(path, config, options, dir_lock, LogState::default()))
    }

    async fn initialize(path: &Path, config: &LogConfig) -> Result<DirLock> {
        let dir_lock = DirLock::acquire(path)?;
        let stored = async {
            config.store(path).await?;
            sync_dir(path).await?;
            sync_parent(path).await?;
            Ok::<(), Error>(())
        }
        .await;
        match stored {
            Ok(()) => Ok(dir_lock),
            Err(e) => {
                dir_lock.release()?;
                Err(e)
            }
        }
    }

    /// Open an existing log directory.
    ///
    /// Finds the durable end by scanning the tail of the last segment. A torn
    /// final record is ignored here and cut off when a writer opens.
    pub async fn open(path: impl AsRef<Path>, options: Options) -> Result<Log> {
        let path = path.as_ref().to_path_buf();
        tokio::fs::metadata(&path).await.map_err(not_exist)?;
        let config = LogConfig::load(&path).await?;

        let dir_lock = if options.clear_orphaned_lock {
            DirLock::acquire_clearing(&path)?
        } else {
            DirLock::acquire(&path)?
        };

        let state = match Self::load_state(&path, &config, &options).await {
            Ok(state) => state,
            Err(e) => {
                dir_lock.release()?;
                return Err(e);
            }
        };

        info!(
            path = ?path,
            segments = state.segments.len(),
            end_position = state.synced_position,
            end_offset = state.synced_offset,
            "Log opened"
        );
        Ok(Self::start(path, config, options, dir_lock, state))
    }

    async fn load_state(path: &Path, config: &LogConfig, options: &Options) -> Result<LogState> {
        let segments = list_segments(path).await?;
        let (position, offset) = match segments.last() {
            Some(last) => {
                let end = find_end(last, path, config.max_record_size, options.index_buffer_size)
                    .await?;
                (end.position, end.offset)
            }
            None => (0, 0),
        };
        Ok(LogState::new(segments, position, offset))
    }

    fn start(
        path: PathBuf,
        config: LogConfig,
        options: Options,
        dir_lock: DirLock,
        state: LogState,
    ) -> Log {
        let (stat_tx, _) = watch::channel(state.stat());
        let expire_interval = options.expire_interval;
        let inner = Arc::new(LogInner {
            path,
            config,
            options,
            state: Mutex::new(state),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            writer: Mutex::new(Weak::new()),
            stat_tx: Mutex::new(Some(stat_tx)),
            dir_lock: Mutex::new(Some(dir_lock)),
            expirer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let token = CancellationToken::new();
        let handle = tokio::spawn(expirer::run(
            Arc::downgrade(&inner),
            expire_interval,
            token.clone(),
        ));
        *inner.expirer.lock() = Some((token, handle));

        Log { inner }
    }

    /// Remove a log directory and everything in it.
    pub async fn delete(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tokio::fs::remove_dir_all(path).await.map_err(not_exist)?;
        sync_parent(path).await?;
        info!(path = ?path, "Log deleted");
        Ok(())
    }

    /// Delete every segment of a log, keeping its config and lock.
    pub async fn truncate(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut entries = tokio::fs::read_dir(path).await.map_err(not_exist)?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if segment::is_segment_file(&name.to_string_lossy()) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        sync_dir(path).await?;
        info!(path = ?path, files = removed, "Log truncated");
        Ok(())
    }

    /// Remove an orphaned lock file left behind by a crashed holder.
    pub fn clear_lock(path: impl AsRef<Path>) -> Result<()> {
        lock::clear(path.as_ref())
    }

    // ========================================================================
    // Live log
    // ========================================================================

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn config(&self) -> &LogConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn inner(&self) -> &Arc<LogInner> {
        &self.inner
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Current boundaries of the log.
    pub fn stat(&self) -> Stat {
        self.inner.state.lock().stat()
    }

    /// Snapshot of the segment descriptors, oldest first.
    pub fn segments(&self) -> Vec<SegmentDescriptor> {
        self.inner.state.lock().segments.clone()
    }

    pub(crate) fn snapshot(&self) -> (Stat, Vec<SegmentDescriptor>) {
        let state = self.inner.state.lock();
        (state.stat(), state.segments.clone())
    }

    /// Subscribe to stat changes. The receiver always holds the latest
    /// value; dropping it unsubscribes. After `close` the channel reports
    /// closed.
    pub fn subscribe(&self) -> Result<watch::Receiver<Stat>> {
        self.inner
            .stat_tx
            .lock()
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(Error::Closed)
    }

    /// Publish the current stat to all subscribers.
    pub(crate) fn notify(&self) {
        self.inner.notify();
    }

    /// Create the log's single writer. Fails with `WriterActive` while
    /// another writer is open.
    pub async fn new_writer(&self, buffer_size: usize, mode: IoMode) -> Result<LogWriter> {
        self.check_open()?;
        LogWriter::new(self.clone(), buffer_size, mode).await
    }

    /// Create a reader positioned at the start of the log.
    pub async fn new_reader(&self, buffer_size: usize, follow: bool, mode: IoMode) -> Result<LogReader> {
        self.check_open()?;
        LogReader::new(self.clone(), buffer_size, follow, mode).await
    }

    /// Close the log: flush and close the open writer, stop the expirer,
    /// close reader subscriptions and release the directory lock.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }

        let writer = self.inner.writer.lock().upgrade();
        let shutdown = match writer {
            Some(writer) => match writer.shutdown().await {
                Ok(()) | Err(Error::Closed) => Ok(()),
                Err(e) => {
                    warn!(path = ?self.inner.path, error = %e, "Failed to close log writer");
                    Err(e)
                }
            },
            None => Ok(()),
        };

        let expirer = self.inner.expirer.lock().take();
        if let Some((token, handle)) = expirer {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(path = ?self.inner.path, error = %e, "Expirer task failed");
            }
        }

        self.inner.stat_tx.lock().take();

        let dir_lock = self.inner.dir_lock.lock().take();
        if let Some(dir_lock) = dir_lock {
            dir_lock.release()?;
        }

        shutdown?;
        info!(path = ?self.inner.path, "Log closed");
        Ok(())
    }

    pub(crate) fn register_writer(&self, core: &Arc<WriterCore>) {
        *self.inner.writer.lock() = Arc::downgrade(core);
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Drop the leading segments selected by `expired` and delete their
    /// files. Returns how many segments were removed.
    pub(crate) async fn remove_leading<F>(&self, reason: &'static str, expired: F) -> Result<usize>
    where
        F: FnMut(&SegmentDescriptor, &SegmentDescriptor) -> bool,
    {
        self.inner.remove_leading(reason, expired).await
    }
}

impl LogInner {
    pub(crate) fn notify(&self) {
        let stat = self.state.lock().stat();
        if let Some(tx) = self.stat_tx.lock().as_ref() {
            tx.send_replace(stat);
        }
    }

    pub(crate) async fn remove_leading<F>(&self, reason: &'static str, expired: F) -> Result<usize>
    where
        F: FnMut(&SegmentDescriptor, &SegmentDescriptor) -> bool,
    {
        let victims = self.state.lock().remove_leading(expired);
        if victims.is_empty() {
            return Ok(0);
        }

        for desc in &victims {
            remove_if_exists(&desc.records_path(&self.path)).await?;
            remove_if_exists(&desc.index_path(&self.path)).await?;
            info!(
                path = ?self.path,
                segment = %desc.name,
                reason,
                "Segment expired"
            );
        }
        self.notify();
        Ok(victims.len())
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
