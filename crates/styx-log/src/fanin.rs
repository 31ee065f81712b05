//! Fanin
//!
//! Multiplexes many logical writers onto the single [`LogWriter`] of a log
//! and tells each of them when its own records are durable.
//!
//! ## Write Token
//!
//! ```text
//! FaninWriter A ──write──► [token: Mutex<LogWriter>] ◄──write── FaninWriter B
//!       │                        (FIFO, waiting counter)             │
//!       └─flush: flush LogWriter, queue {pos,count}, release token ──┘
//! ```
//!
//! A writer takes the token on its first `write` and keeps it until `flush`,
//! so its records are contiguous in the log. While another writer waits, a
//! token holder that has written something yields by acting as if the
//! buffer were full.
//!
//! ## Sync Notification
//!
//! Every `flush` queues one pending `SyncEvent`. A notifier task per writer
//! watches the log writer's sync events and fires the handler once for each
//! pending event whose position is durable, oldest first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use styx_core::{IoMode, Record};
use tokio::sync::{watch, Notify, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::syncer::{SyncEvent, SyncHandler};
use crate::writer::LogWriter;

/// Shared handle over one `LogWriter`.
#[derive(Clone)]
pub struct Fanin {
    inner: Arc<FaninInner>,
}

struct FaninInner {
    writer: Arc<tokio::sync::Mutex<Option<LogWriter>>>,
    waiting: AtomicUsize,
    events: watch::Receiver<SyncEvent>,
}

impl Fanin {
    pub fn new(writer: LogWriter) -> Self {
        let events = writer.subscribe_syncs();
        Self {
            inner: Arc::new(FaninInner {
                writer: Arc::new(tokio::sync::Mutex::new(Some(writer))),
                waiting: AtomicUsize::new(0),
                events,
            }),
        }
    }

    /// Create a logical writer.
    pub fn writer(&self, mode: IoMode) -> FaninWriter {
        FaninWriter::new(self.inner.clone(), mode)
    }

    /// Close the underlying `LogWriter` once the current token holder
    /// releases it. Logical writers fail with `Closed` afterwards.
    pub async fn close(&self) -> Result<()> {
        let writer = self.inner.writer.lock().await.take();
        match writer {
            Some(writer) => writer.close().await,
            None => Err(Error::Closed),
        }
    }
}

type PendingSyncs = Arc<Mutex<VecDeque<SyncEvent>>>;
type SharedHandler = Arc<Mutex<Option<SyncHandler>>>;

pub struct FaninWriter {
    fanin: Arc<FaninInner>,
    mode: IoMode,
    token: Option<OwnedMutexGuard<Option<LogWriter>>>,
    must_flush: bool,
    wrote: bool,
    initial_position: i64,
    flushed_count: i64,
    pending: PendingSyncs,
    handler: SharedHandler,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    notifier: Option<JoinHandle<()>>,
}

impl Drop for FaninWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.notifier.take() {
            handle.abort();
        }
    }
}

impl FaninWriter {
    fn new(fanin: Arc<FaninInner>, mode: IoMode) -> Self {
        let pending = PendingSyncs::default();
        let handler = SharedHandler::default();
        let wake = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let notifier = tokio::spawn(run_notifier(
            fanin.events.clone(),
            pending.clone(),
            handler.clone(),
            wake.clone(),
            cancel.clone(),
        ));
        Self {
            fanin,
            mode,
            token: None,
            must_flush: false,
            wrote: false,
            initial_position: 0,
            flushed_count: 0,
            pending,
            handler,
            wake,
            cancel,
            notifier: Some(notifier),
        }
    }

    /// Append a record, taking the write token if not already held.
    pub async fn write(&mut self, record: &Record) -> Result<usize> {
        loop {
            self.acquire().await?;
            let must_yield = self.wrote && self.fanin.waiting.load(Ordering::Acquire) > 0;
            if self.must_flush || must_yield {
                match self.mode {
                    IoMode::Manual => return Err(Error::MustFlush),
                    IoMode::Auto => {
                        self.flush().await?;
                        continue;
                    }
                }
            }

            let result = self.log_writer()?.write(record).await;
            match result {
                Ok(n) => {
                    self.wrote = true;
                    return Ok(n);
                }
                Err(Error::MustFlush) => self.must_flush = true,
                Err(e) => return Err(e),
            }
        }
    }

    /// Flush this writer's records, queue a sync notification for them
    /// and release the write token.
    pub async fn flush(&mut self) -> Result<()> {
        let Some(mut token) = self.token.take() else {
            return Ok(());
        };
        let Some(writer) = token.as_mut() else {
            return Err(Error::Closed);
        };

        let waiting = self.fanin.waiting.load(Ordering::Acquire) > 0;
        if self.must_flush || self.wrote || waiting {
            writer.flush().await?;
        }

        let position = writer.tell().0;
        let count = self.flushed_count + (position - self.initial_position);
        self.flushed_count = count;
        self.must_flush = false;
        self.wrote = false;
        drop(token);

        self.pending.lock().push_back(SyncEvent { position, count });
        self.wake.notify_one();
        Ok(())
    }

    /// Install the callback fired once per `flush` when its records are
    /// durable.
    pub fn handle_sync<F>(&self, handler: F)
    where
        F: Fn(SyncEvent) + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Box::new(handler));
    }

    /// Records written by this writer and flushed so far.
    pub fn flushed_count(&self) -> i64 {
        self.flushed_count
    }

    /// Flush if needed, release the token and wait until every pending
    /// sync notification has fired.
    pub async fn close(mut self) -> Result<()> {
        let flushed = self.flush().await;
        self.cancel.cancel();
        if let Some(handle) = self.notifier.take() {
            handle.await?;
        }
        flushed
    }

    async fn acquire(&mut self) -> Result<()> {
        if self.token.is_some() {
            return Ok(());
        }

        self.fanin.waiting.fetch_add(1, Ordering::AcqRel);
        let token = self.fanin.writer.clone().lock_owned().await;
        self.fanin.waiting.fetch_sub(1, Ordering::AcqRel);

        let Some(writer) = token.as_ref() else {
            return Err(Error::Closed);
        };
        self.initial_position = writer.tell().0;
        self.token = Some(token);
        Ok(())
    }

    fn log_writer(&mut self) -> Result<&mut LogWriter> {
        self.token
            .as_mut()
            .and_then(|token| token.as_mut())
            .ok_or(Error::Closed)
    }
}

async fn run_notifier(
    mut events: watch::Receiver<SyncEvent>,
    pending: PendingSyncs,
    handler: SharedHandler,
    wake: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut closing = false;
    let mut writer_gone = false;
    loop {
        let synced = events.borrow_and_update().position;
        loop {
            let ready = {
                let mut pending = pending.lock();
                match pending.front() {
                    Some(event) if event.position <= synced => pending.pop_front(),
                    _ => None,
                }
            };
            let Some(event) = ready else { break };
            if let Some(handler) = handler.lock().as_ref() {
                handler(event);
            }
        }

        let drained = pending.lock().is_empty();
        if writer_gone || (closing && drained) {
            if !drained {
                debug!(pending = pending.lock().len(), "Log writer closed with unsynced fanin flushes");
            }
            return;
        }

        tokio::select! {
            changed = events.changed() => writer_gone = changed.is_err(),
            _ = wake.notified() => {}
            _ = cancel.cancelled(), if !closing => closing = true,
        }
    }
}
