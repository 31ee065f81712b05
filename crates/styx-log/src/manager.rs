//! Log Manager
//!
//! Owns every log under one directory, keyed by name, and serialises the
//! operations that change the set: create, delete, truncate and restore.
//!
//! ## Managed Log Status
//!
//! ```text
//! Unknown ──open ok──► Ok ──scan──► Scanning ──┬──► Ok
//!    │                                          ├──► Corrupt  (scan found damage)
//!    └──open failed──► Scanning                 └──► Tainted  (any other failure)
//!
//! Corrupt / Tainted ──scan──► Scanning ──► ...
//! ```
//!
//! A scan closes the log and its writer, runs [`Log::scan`] over the
//! directory and reopens it. Only logs in `Ok` hand out readers and writers.
//!
//! ## Background Tasks
//!
//! - one scan task per log while a scan runs
//! - one stat listener per open log feeding the Prometheus gauges
//!
//! Both are owned by the managed log and stopped when it is closed or
//! deleted.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use styx_core::IoMode;
use styx_observability::metrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{LogConfig, Options};
use crate::error::{Error, Result};
use crate::fanin::Fanin;
use crate::log::Log;
use crate::reader::LogReader;
use crate::stat::Stat;

// ============================================================================
// Configuration
// ============================================================================

/// Log manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Directory holding one sub-directory per log
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Limits for logs created without explicit ones
    #[serde(default)]
    pub default_log_config: LogConfig,

    /// Buffer size for readers and writers (default: 64KiB)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Clear stale lock files left by a crashed process when opening
    #[serde(default)]
    pub clear_orphaned_locks: bool,
}

fn default_directory() -> PathBuf {
    PathBuf::from("./data/logs")
}

fn default_buffer_size() -> usize {
    64 * 1024
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            default_log_config: LogConfig::default(),
            buffer_size: default_buffer_size(),
            clear_orphaned_locks: false,
        }
    }
}

/// Status of a managed log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Unknown,
    Ok,
    Scanning,
    Corrupt,
    Tainted,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Ok => "ok",
            Status::Scanning => "scanning",
            Status::Corrupt => "corrupt",
            Status::Tainted => "tainted",
        }
    }

    fn code(&self) -> i64 {
        match self {
            Status::Unknown => 0,
            Status::Ok => 1,
            Status::Scanning => 2,
            Status::Corrupt => 3,
            Status::Tainted => 4,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log names are restricted to `[A-Za-z0-9_-]+`.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

// ============================================================================
// Managed log
// ============================================================================

struct ManagedLog {
    name: String,
    path: PathBuf,
    log: Mutex<Option<Log>>,
    fanin: tokio::sync::Mutex<Option<Fanin>>,
    status: watch::Sender<Status>,
    listener: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    scan: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ManagedLog {
    fn new(name: String, path: PathBuf) -> Arc<Self> {
        let (status, _) = watch::channel(Status::Unknown);
        metrics::record_status(&name, Status::Unknown.code());
        Arc::new(Self {
            name,
            path,
            log: Mutex::new(None),
            fanin: tokio::sync::Mutex::new(None),
            status,
            listener: Mutex::new(None),
            scan: Mutex::new(None),
        })
    }

    fn status(&self) -> Status {
        *self.status.borrow()
    }

    fn set_status(&self, status: Status) {
        let previous = self.status.send_replace(status);
        metrics::record_status(&self.name, status.code());
        if previous != status {
            info!(log = %self.name, from = %previous, to = %status, "Log status changed");
        }
    }

    /// Install an open log and start feeding its stats to the gauges.
    fn attach(&self, log: Log) -> Result<()> {
        let stats = log.subscribe()?;
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_listener(self.name.clone(), stats, token.clone()));
        if let Some((old_token, old_handle)) = self.listener.lock().replace((token, handle)) {
            old_token.cancel();
            old_handle.abort();
        }
        *self.log.lock() = Some(log);
        self.set_status(Status::Ok);
        Ok(())
    }

    /// The open log, if it is usable.
    fn log(&self) -> Result<Log> {
        let status = self.status();
        if status != Status::Ok {
            return Err(Error::Unavailable(format!("{} is {}", self.name, status)));
        }
        self.log
            .lock()
            .clone()
            .ok_or_else(|| Error::Unavailable(format!("{} is not open", self.name)))
    }

    /// Close the fanin, the log and the stat listener.
    async fn shutdown(&self) -> Result<()> {
        if let Some(fanin) = self.fanin.lock().await.take() {
            match fanin.close().await {
                Ok(()) | Err(Error::Closed) => {}
                Err(e) => warn!(log = %self.name, error = %e, "Failed to close log writer"),
            }
        }

        let listener = self.listener.lock().take();
        if let Some((token, handle)) = listener {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(log = %self.name, error = %e, "Stat listener failed");
            }
        }

        let log = self.log.lock().take();
        match log {
            Some(log) => match log.close().await {
                Ok(()) | Err(Error::Closed) => Ok(()),
                Err(e) => Err(e),
            },
            None => Ok(()),
        }
    }

    /// Cancel a running scan and wait for it to unwind, so that any log it
    /// opened is closed and its lock released.
    async fn stop_scan(&self) {
        let scan = self.scan.lock().take();
        if let Some((token, handle)) = scan {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(log = %self.name, error = %e, "Scan task failed");
            }
        }
    }
}

async fn run_listener(name: String, mut stats: watch::Receiver<Stat>, cancel: CancellationToken) {
    loop {
        let stat = *stats.borrow_and_update();
        metrics::record_start(&name, stat.start_position);
        metrics::record_position(&name, stat.start_offset, stat.end_position, stat.end_offset);

        tokio::select! {
            changed = stats.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

async fn run_scan(managed: Arc<ManagedLog>, options: Options, cancel: CancellationToken) {
    managed.set_status(Status::Scanning);
    if let Err(e) = managed.shutdown().await {
        warn!(log = %managed.name, error = %e, "Failed to close log before scan");
    }

    let scanned = tokio::select! {
        scanned = Log::scan(&managed.path) => scanned,
        _ = cancel.cancelled() => {
            debug!(log = %managed.name, "Scan cancelled");
            return;
        }
    };

    let result = match scanned {
        Ok(stat) => {
            info!(
                log = %managed.name,
                end_position = stat.end_position,
                end_offset = stat.end_offset,
                "Scan found no damage"
            );
            match Log::open(&managed.path, options).await {
                Ok(log) if cancel.is_cancelled() => {
                    if let Err(e) = log.close().await {
                        warn!(log = %managed.name, error = %e, "Failed to close log after cancelled scan");
                    }
                    debug!(log = %managed.name, "Scan cancelled");
                    return;
                }
                Ok(log) => managed.attach(log),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => metrics::record_scan(&managed.name, "ok"),
        Err(e) if e.is_corrupt() => {
            error!(log = %managed.name, error = %e, "Log is corrupt");
            metrics::record_scan(&managed.name, "corrupt");
            managed.set_status(Status::Corrupt);
        }
        Err(e) => {
            error!(log = %managed.name, error = %e, "Log scan failed");
            metrics::record_scan(&managed.name, "tainted");
            managed.set_status(Status::Tainted);
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Owner of every log in a directory.
pub struct LogManager {
    config: ManagerConfig,
    options: Options,
    logs: tokio::sync::Mutex<HashMap<String, Arc<ManagedLog>>>,
    closed: AtomicBool,
}

impl LogManager {
    /// Open every log in `config.directory`, creating the directory if
    /// needed. Logs that fail to open are scanned in the background.
    pub async fn open(config: ManagerConfig, options: Options) -> Result<Self> {
        metrics::init();
        tokio::fs::create_dir_all(&config.directory).await?;

        let options = Options {
            clear_orphaned_lock: options.clear_orphaned_lock || config.clear_orphaned_locks,
            ..options
        };
        let manager = Self {
            config,
            options,
            logs: tokio::sync::Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&manager.config.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_name(&name).is_ok() => names.push(name),
                _ => warn!(path = ?entry.path(), "Skipping directory with invalid log name"),
            }
        }
        names.sort();

        {
            let mut logs = manager.logs.lock().await;
            for name in names {
                let managed = ManagedLog::new(name.clone(), manager.log_path(&name));
                match Log::open(&managed.path, manager.options.clone()).await {
                    Ok(log) => managed.attach(log)?,
                    Err(e) => {
                        warn!(log = %name, error = %e, "Failed to open log, scanning");
                        manager.spawn_scan(&managed).await;
                    }
                }
                logs.insert(name, managed);
            }
            info!(
                directory = ?manager.config.directory,
                logs = logs.len(),
                "Log manager opened"
            );
        }
        Ok(manager)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.config.directory.join(name)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    async fn spawn_scan(&self, managed: &Arc<ManagedLog>) {
        managed.stop_scan().await;
        managed.set_status(Status::Scanning);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_scan(
            managed.clone(),
            self.options.clone(),
            token.clone(),
        ));
        *managed.scan.lock() = Some((token, handle));
    }

    async fn managed(&self, name: &str) -> Result<Arc<ManagedLog>> {
        self.check_open()?;
        validate_name(name)?;
        self.logs
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Names of all managed logs, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        self.check_open()?;
        let mut names: Vec<String> = self.logs.lock().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// The open log called `name`. Fails with `Unavailable` unless the log
    /// is `Ok`.
    pub async fn get(&self, name: &str) -> Result<Log> {
        self.managed(name).await?.log()
    }

    pub async fn status(&self, name: &str) -> Result<Status> {
        Ok(self.managed(name).await?.status())
    }

    /// Watch status transitions of a log, e.g. to await the end of a scan.
    pub async fn watch_status(&self, name: &str) -> Result<watch::Receiver<Status>> {
        Ok(self.managed(name).await?.status.subscribe())
    }

    /// Create a new log, with the manager's default limits unless given.
    pub async fn create(&self, name: &str, config: Option<LogConfig>) -> Result<Log> {
        self.check_open()?;
        validate_name(name)?;
        let mut logs = self.logs.lock().await;
        if logs.contains_key(name) {
            return Err(Error::Exist);
        }

        let managed = ManagedLog::new(name.to_string(), self.log_path(name));
        let config = config.unwrap_or(self.config.default_log_config);
        let log = Log::create(&managed.path, config, self.options.clone()).await?;
        managed.attach(log.clone())?;
        logs.insert(name.to_string(), managed);
        Ok(log)
    }

    /// Close and remove a log and its directory.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.check_open()?;
        validate_name(name)?;
        let mut logs = self.logs.lock().await;
        let managed = logs
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        managed.stop_scan().await;
        managed.shutdown().await?;
        Log::delete(&managed.path).await?;
        metrics::forget(name);
        Ok(())
    }

    /// Drop every record of a log, keeping its config.
    pub async fn truncate(&self, name: &str) -> Result<()> {
        self.check_open()?;
        validate_name(name)?;
        let logs = self.logs.lock().await;
        let managed = logs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        managed.stop_scan().await;
        managed.shutdown().await?;
        Log::truncate(&managed.path).await?;
        let log = Log::open(&managed.path, self.options.clone()).await?;
        managed.attach(log)?;
        Ok(())
    }

    /// Restore a new log called `name` from a backup stream.
    pub async fn restore<R>(&self, name: &str, reader: R) -> Result<Log>
    where
        R: Read + Send + 'static,
    {
        self.check_open()?;
        validate_name(name)?;
        let mut logs = self.logs.lock().await;
        if logs.contains_key(name) {
            return Err(Error::Exist);
        }

        let managed = ManagedLog::new(name.to_string(), self.log_path(name));
        Log::restore(&managed.path, reader).await?;
        let log = Log::open(&managed.path, self.options.clone()).await?;
        managed.attach(log.clone())?;
        logs.insert(name.to_string(), managed);
        Ok(log)
    }

    /// Back up a live log into `writer`.
    pub async fn backup<W>(&self, name: &str, writer: W) -> Result<(W, Stat)>
    where
        W: Write + Send + 'static,
    {
        let log = self.get(name).await?;
        log.backup(writer).await
    }

    /// Start a background corruption scan. Watch the status to learn the
    /// outcome.
    pub async fn scan(&self, name: &str) -> Result<()> {
        let managed = self.managed(name).await?;
        self.spawn_scan(&managed).await;
        Ok(())
    }

    /// The shared writer of a log, created on first use.
    pub async fn writer(&self, name: &str) -> Result<Fanin> {
        let managed = self.managed(name).await?;
        let log = managed.log()?;
        let mut fanin = managed.fanin.lock().await;
        if let Some(fanin) = fanin.as_ref() {
            return Ok(fanin.clone());
        }
        let writer = log.new_writer(self.config.buffer_size, IoMode::Manual).await?;
        let created = Fanin::new(writer);
        *fanin = Some(created.clone());
        Ok(created)
    }

    /// A new reader over a log.
    pub async fn reader(&self, name: &str, follow: bool, mode: IoMode) -> Result<LogReader> {
        let log = self.get(name).await?;
        log.new_reader(self.config.buffer_size, follow, mode).await
    }

    /// Close every managed log. The manager is unusable afterwards.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }

        let mut logs = self.logs.lock().await;
        let mut first_error = None;
        for (name, managed) in logs.drain() {
            managed.stop_scan().await;
            if let Err(e) = managed.shutdown().await {
                error!(log = %name, error = %e, "Failed to close log");
                first_error.get_or_insert(e);
            }
        }
        info!(directory = ?self.config.directory, "Log manager closed");
        first_error.map_or(Ok(()), Err)
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        for name in ["orders", "a", "Log_01", "x-y-z"] {
            validate_name(name).unwrap();
        }
        for name in ["", "a b", "../etc", "a/b", "naïve", "dot.name"] {
            assert!(matches!(validate_name(name), Err(Error::InvalidName(_))));
        }
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: ManagerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.buffer_size, 64 * 1024);
        assert_eq!(config.default_log_config, LogConfig::default());
        assert!(!config.clear_orphaned_locks);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(Status::Ok.to_string(), "ok");
        assert_eq!(Status::Tainted.as_str(), "tainted");
    }
}
