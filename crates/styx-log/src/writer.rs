//! Log Writer
//!
//! The single appender of a log. Holding a `LogWriter` means holding the
//! log's write lock; a second `new_writer` fails with `WriterActive` until
//! this one is closed or dropped.
//!
//! ## Write / Flush / Sync
//!
//! ```text
//! write ──► segment buffer ── SegmentFull ──► flush, roll to new segment
//!                          └─ MustFlush  ──► flush (Auto) / return (Manual)
//!
//! flush ──► count/size retention ──► segment buffers to OS
//!        └► flushed pos, dirty segment ──► signal syncer
//!
//! syncer ──► fsync ──► synced pos ──► SyncHandler + Stat subscribers
//! ```
//!
//! Once more than `max_dirty_segments` segments wait for an fsync, `flush`
//! blocks until the syncer picks up the signal.
//!
//! ## Shutdown
//!
//! The segment, buffers and syncer live in a [`WriterCore`] that the log
//! also references. [`Log::close`] flushes it and joins the syncer before the
//! directory lock is released; the `LogWriter` handle is `Closed` from then
//! on.

use std::sync::Arc;

use styx_core::{IoMode, Record};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::log::Log;
use crate::segment::{SegmentDescriptor, SegmentWriter};
use crate::syncer::{SyncEvent, SyncShared, Syncer};

// ============================================================================
// Shared core
// ============================================================================

/// Writer state reachable from both the `LogWriter` handle and the log.
pub(crate) struct WriterCore {
    state: tokio::sync::Mutex<WriterState>,
}

struct WriterState {
    log: Log,
    segment: Option<SegmentWriter>,
    buffer_size: usize,
    position: i64,
    offset: i64,
    must_flush: bool,
    must_roll: bool,
    new_segment: bool,
    closed: bool,
    sync_tx: Option<mpsc::Sender<()>>,
    syncer: Option<JoinHandle<()>>,
    shared: Arc<SyncShared>,
}

impl Drop for WriterState {
    fn drop(&mut self) {
        if let Some(handle) = self.syncer.take() {
            handle.abort();
        }
    }
}

impl WriterCore {
    /// Flush, close the segment and wait for the final sync. A second call
    /// fails with `Closed`.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        self.state.lock().await.shutdown().await
    }
}

impl WriterState {
    fn check_usable(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.log.check_open()?;
        if let Some(e) = self.shared.error.lock().as_ref() {
            return Err(Error::SyncFailed(e.clone()));
        }
        Ok(())
    }

    fn sync_error(&self) -> Error {
        match self.shared.error.lock().as_ref() {
            Some(e) => Error::SyncFailed(e.clone()),
            None => Error::Closed,
        }
    }

    async fn write(&mut self, record: &Record, mode: IoMode) -> Result<usize> {
        self.check_usable()?;
        loop {
            if self.must_flush {
                match mode {
                    IoMode::Manual => return Err(Error::MustFlush),
                    IoMode::Auto => self.flush().await?,
                }
            }
            if self.must_roll {
                self.roll().await?;
            }

            let segment = self.segment.as_mut().ok_or(Error::Closed)?;
            match segment.write(record).await {
                Ok(n) => {
                    self.position += 1;
                    self.offset += n as i64;
                    return Ok(n);
                }
                Err(Error::MustFlush) => self.must_flush = true,
                Err(Error::SegmentFull) => {
                    self.must_flush = true;
                    self.must_roll = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.enforce_retention().await?;

        let segment = self.segment.as_mut().ok_or(Error::Closed)?;
        segment.flush().await?;
        let name = segment.descriptor().name.clone();

        let dirty = {
            let mut state = self.log.inner().state.lock();
            state.flushed_position = self.position;
            state.flushed_offset = self.offset;
            if let Some(desc) = state.segments.iter_mut().rev().find(|d| d.name == name) {
                desc.dirty = true;
            }
            if self.new_segment {
                state.directory_dirty = true;
            }
            state.segments.iter().filter(|d| d.dirty).count()
        };
        self.new_segment = false;
        self.must_flush = false;

        self.signal_syncer(dirty).await
    }

    async fn signal_syncer(&mut self, dirty: usize) -> Result<()> {
        let tx = self.sync_tx.as_ref().ok_or(Error::Closed)?;
        if dirty >= self.log.inner().options.max_dirty_segments {
            if tx.send(()).await.is_err() {
                return Err(self.sync_error());
            }
            return Ok(());
        }
        match tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Closed(())) => Err(self.sync_error()),
        }
    }

    async fn enforce_retention(&mut self) -> Result<()> {
        let config = self.log.config();
        let count_threshold = LogConfig::limited(config.log_max_count)
            .then(|| self.position - config.log_max_count);
        let size_threshold = LogConfig::limited(config.log_max_size)
            .then(|| self.offset - config.log_max_size);
        if count_threshold.is_none() && size_threshold.is_none() {
            return Ok(());
        }

        self.log
            .remove_leading("retention", |_, next| {
                count_threshold.map_or(false, |t| next.base_position <= t)
                    || size_threshold.map_or(false, |t| next.base_offset <= t)
            })
            .await?;
        Ok(())
    }

    async fn roll(&mut self) -> Result<()> {
        if let Some(segment) = self.segment.take() {
            segment.close().await?;
        }

        let inner = self.log.inner();
        let desc = SegmentDescriptor::new(
            self.position,
            self.offset,
            inner.options.clock.now_unix(),
        );
        let segment = SegmentWriter::create(
            &inner.path,
            desc.clone(),
            inner.config,
            inner.options.clock.clone(),
            self.buffer_size,
            inner.options.index_buffer_size,
        )
        .await?;
        inner.state.lock().segments.push(desc);

        debug!(
            path = ?inner.path,
            segment = %segment.descriptor().name,
            "Rolled to new segment"
        );
        self.segment = Some(segment);
        self.new_segment = true;
        self.must_roll = false;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.closed = true;

        let flushed = if self.segment.is_some() {
            self.flush().await
        } else {
            Ok(())
        };
        let closed = match self.segment.take() {
            Some(segment) => segment.close().await,
            None => Ok(()),
        };

        drop(self.sync_tx.take());
        if let Some(handle) = self.syncer.take() {
            handle.await?;
        }

        flushed?;
        closed?;
        if let Some(e) = self.shared.error.lock().clone() {
            return Err(Error::SyncFailed(e));
        }

        info!(
            path = ?self.log.path(),
            position = self.position,
            offset = self.offset,
            "Log writer closed"
        );
        Ok(())
    }
}

// ============================================================================
// Handle
// ============================================================================

pub struct LogWriter {
    core: Arc<WriterCore>,
    _write_guard: OwnedMutexGuard<()>,
    mode: IoMode,
    position: i64,
    offset: i64,
    initial_position: i64,
    shared: Arc<SyncShared>,
    events: watch::Receiver<SyncEvent>,
}

impl LogWriter {
    pub(crate) async fn new(log: Log, buffer_size: usize, mode: IoMode) -> Result<Self> {
        let inner = log.inner().clone();
        let write_guard = inner
            .write_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::WriterActive)?;

        let options = &inner.options;
        let last = inner.state.lock().segments.last().cloned();
        let (segment, new_segment) = match last {
            Some(desc) => {
                let segment = SegmentWriter::open(
                    &inner.path,
                    desc,
                    inner.config,
                    options.clock.clone(),
                    buffer_size,
                    options.index_buffer_size,
                )
                .await?;
                (segment, false)
            }
            None => {
                let (position, offset) = {
                    let state = inner.state.lock();
                    (state.flushed_position, state.flushed_offset)
                };
                let desc = SegmentDescriptor::new(position, offset, options.clock.now_unix());
                let segment = SegmentWriter::create(
                    &inner.path,
                    desc.clone(),
                    inner.config,
                    options.clock.clone(),
                    buffer_size,
                    options.index_buffer_size,
                )
                .await?;
                inner.state.lock().segments.push(desc);
                (segment, true)
            }
        };

        let position = segment.position();
        let offset = segment.offset();
        let synced_position = {
            let mut state = inner.state.lock();
            state.flushed_position = position;
            state.flushed_offset = offset;
            if state.synced_position > position {
                state.synced_position = position;
                state.synced_offset = offset;
            }
            state.synced_position
        };

        let shared = Arc::new(SyncShared::default());
        let (events_tx, events) = watch::channel(SyncEvent {
            position: synced_position,
            count: 0,
        });
        let (sync_tx, sync_rx) = mpsc::channel(1);
        let syncer = Syncer {
            log: log.clone(),
            shared: shared.clone(),
            events: events_tx,
            initial_position: position,
        };
        let handle = tokio::spawn(syncer.run(sync_rx));

        info!(
            path = ?inner.path,
            segment = %segment.descriptor().name,
            position,
            offset,
            "Log writer opened"
        );

        let core = Arc::new(WriterCore {
            state: tokio::sync::Mutex::new(WriterState {
                log: log.clone(),
                segment: Some(segment),
                buffer_size,
                position,
                offset,
                must_flush: false,
                must_roll: false,
                new_segment,
                closed: false,
                sync_tx: Some(sync_tx),
                syncer: Some(handle),
                shared: shared.clone(),
            }),
        });
        log.register_writer(&core);

        Ok(Self {
            core,
            _write_guard: write_guard,
            mode,
            position,
            offset,
            initial_position: position,
            shared,
            events,
        })
    }

    /// Append a record, returning its on-disk size.
    ///
    /// In Manual mode returns `MustFlush` whenever the caller has to call
    /// [`flush`](Self::flush) before the record can be accepted.
    pub async fn write(&mut self, record: &Record) -> Result<usize> {
        let mut state = self.core.state.lock().await;
        let result = state.write(record, self.mode).await;
        self.position = state.position;
        self.offset = state.offset;
        result
    }

    /// Enforce count/size retention, hand buffered records to the OS and
    /// signal the syncer. Durability is reported asynchronously.
    pub async fn flush(&mut self) -> Result<()> {
        let mut state = self.core.state.lock().await;
        state.check_usable()?;
        state.flush().await
    }

    /// Flush, then wait until everything written so far is durable.
    pub async fn sync(&mut self) -> Result<SyncEvent> {
        self.flush().await?;
        let target = self.position;
        loop {
            let event = *self.events.borrow_and_update();
            if event.position >= target {
                return Ok(event);
            }
            if self.events.changed().await.is_err() {
                return Err(self.sync_error());
            }
        }
    }

    /// Flush, wait for the final sync, and release the write lock. Fails
    /// with `Closed` if the log already closed this writer.
    pub async fn close(self) -> Result<()> {
        self.core.shutdown().await
    }

    /// Install the callback run after each completed sync.
    pub fn handle_sync<F>(&self, handler: F)
    where
        F: Fn(SyncEvent) + Send + Sync + 'static,
    {
        *self.shared.handler.lock() = Some(Box::new(handler));
    }

    /// Latest-value channel of sync events.
    pub fn subscribe_syncs(&self) -> watch::Receiver<SyncEvent> {
        self.events.clone()
    }

    /// Position and offset of the next record to be written.
    pub fn tell(&self) -> (i64, i64) {
        (self.position, self.offset)
    }

    pub fn initial_position(&self) -> i64 {
        self.initial_position
    }

    pub fn mode(&self) -> IoMode {
        self.mode
    }

    fn sync_error(&self) -> Error {
        match self.shared.error.lock().as_ref() {
            Some(e) => Error::SyncFailed(e.clone()),
            None => Error::Closed,
        }
    }
}
