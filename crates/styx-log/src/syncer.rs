//! Background Syncer
//!
//! Each `LogWriter` owns one syncer task. `flush` hands bytes to the OS and
//! signals the syncer; the syncer makes them durable and publishes the new
//! end of the log.
//!
//! ```text
//! LogWriter::flush ──signal (1 slot, coalesced)──► syncer task
//!                                                    │ snapshot flushed pos + dirty segments
//!                                                    │ SyncLock (process-wide)
//!                                                    │   fsync dir (if entries changed)
//!                                                    │   fsync dirty records/index files
//!                                                    ▼
//!                                      synced pos ─► SyncHandler, sync watch, Stat watch
//! ```
//!
//! An I/O error stops the syncer. The error is kept and returned by the
//! writer's next `flush` or `close`.

use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, MutexGuard};
use tracing::{debug, error};

use crate::error::Result;
use crate::fs::{sync_dir, sync_file_if_exists};
use crate::log::Log;

lazy_static! {
    static ref GLOBAL_SYNC_LOCK: Arc<SyncLock> = Arc::new(SyncLock::default());
}

/// Serialises fsync calls across logs so that no two overlap.
#[derive(Debug, Default)]
pub struct SyncLock {
    lock: tokio::sync::Mutex<()>,
}

impl SyncLock {
    /// A private lock, independent of the process-wide one.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide lock shared by every log opened with default options.
    pub fn global() -> Arc<Self> {
        GLOBAL_SYNC_LOCK.clone()
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

/// Durability report delivered to sync handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncEvent {
    /// Every record before this position is durable
    pub position: i64,
    /// Records made durable since the writer was created
    pub count: i64,
}

pub type SyncHandler = Box<dyn Fn(SyncEvent) + Send + Sync>;

/// State shared between a writer and its syncer task.
#[derive(Default)]
pub(crate) struct SyncShared {
    pub handler: Mutex<Option<SyncHandler>>,
    pub error: Mutex<Option<String>>,
}

pub(crate) struct Syncer {
    pub log: Log,
    pub shared: Arc<SyncShared>,
    pub events: watch::Sender<SyncEvent>,
    pub initial_position: i64,
}

impl Syncer {
    pub async fn run(self, mut rx: mpsc::Receiver<()>) {
        while rx.recv().await.is_some() {
            if !self.sync_or_stop().await {
                return;
            }
        }
        // Writer closed: one last pass for whatever it flushed on the way out
        self.sync_or_stop().await;
    }

    async fn sync_or_stop(&self) -> bool {
        match self.sync_once().await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    path = ?self.log.path(),
                    error = %e,
                    "Sync failed, stopping syncer"
                );
                *self.shared.error.lock() = Some(e.to_string());
                false
            }
        }
    }

    async fn sync_once(&self) -> Result<()> {
        let inner = self.log.inner();
        let (position, offset, dirty, directory_dirty) = {
            let mut state = inner.state.lock();
            let dirty: Vec<_> = state
                .segments
                .iter_mut()
                .filter(|s| s.dirty)
                .map(|s| {
                    s.dirty = false;
                    s.clone()
                })
                .collect();
            let directory_dirty = std::mem::take(&mut state.directory_dirty);
            if dirty.is_empty() && !directory_dirty && state.flushed_position <= state.synced_position
            {
                return Ok(());
            }
            (state.flushed_position, state.flushed_offset, dirty, directory_dirty)
        };

        {
            let _guard = inner.options.sync_lock.lock().await;
            let dir = self.log.path();
            if directory_dirty {
                sync_dir(dir).await?;
            }
            for segment in &dirty {
                sync_file_if_exists(&segment.records_path(dir)).await?;
                sync_file_if_exists(&segment.index_path(dir)).await?;
            }
        }

        {
            let mut state = inner.state.lock();
            if position > state.synced_position {
                state.synced_position = position;
                state.synced_offset = offset;
            }
        }

        let event = SyncEvent {
            position,
            count: position - self.initial_position,
        };
        debug!(
            path = ?self.log.path(),
            position,
            offset,
            segments = dirty.len(),
            directory = directory_dirty,
            "Synced"
        );

        self.log.notify();
        if let Some(handler) = self.shared.handler.lock().as_ref() {
            handler(event);
        }
        self.events.send_replace(event);
        Ok(())
    }
}
