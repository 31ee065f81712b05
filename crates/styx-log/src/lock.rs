//! Exclusive directory lock.
//!
//! A live log holds an advisory exclusive lock on `<dir>/lock` and writes its
//! PID into the file. The file is removed on a clean close, so finding it on
//! disk with no holder means the previous owner crashed: that case is
//! reported as [`Error::Orphaned`] and the caller decides whether to clear it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = "lock";

#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Create and lock `<dir>/lock`.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.try_lock_exclusive().map_err(|_| Error::Locked)?;
                file.set_len(0)?;
                write!(file, "{}", std::process::id())?;
                file.sync_all()?;
                debug!(path = ?path, "Lock acquired");
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let file = OpenOptions::new().read(true).write(true).open(&path)?;
                match file.try_lock_exclusive() {
                    Ok(()) => {
                        FileExt::unlock(&file)?;
                        warn!(path = ?path, "Found orphaned lock file");
                        Err(Error::Orphaned)
                    }
                    Err(_) => Err(Error::Locked),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire, clearing an orphaned lock file first if one is found.
    pub fn acquire_clearing(dir: &Path) -> Result<Self> {
        match Self::acquire(dir) {
            Err(Error::Orphaned) => {
                clear(dir)?;
                Self::acquire(dir)
            }
            other => other,
        }
    }

    /// Unlock and remove the lock file.
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        FileExt::unlock(&self.file)?;
        debug!(path = ?self.path, "Lock released");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Remove a stale `<dir>/lock`. Missing files are not an error.
pub fn clear(dir: &Path) -> Result<()> {
    let path = dir.join(LOCK_FILE);
    match std::fs::remove_file(&path) {
        Ok(()) => {
            warn!(path = ?path, "Cleared orphaned lock file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
