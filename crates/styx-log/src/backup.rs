//! Online Backup and Restore
//!
//! A backup is a gzip-compressed tar stream holding a consistent copy of a
//! live log, cut at the synced end of the log when the backup starts.
//!
//! ## Archive Layout
//!
//! ```text
//! config
//! segment-...-records   whole files, the last one cut at EndOffset
//! segment-...-index     whole files, the last one cut after the final
//!                       entry with offset <= EndOffset
//! ```
//!
//! File handles are opened while the log state is locked, so retention
//! running concurrently cannot unlink a file before it is archived. Only
//! bytes at or below the checkpoint are copied, and those are already
//! durable, so the writer keeps appending undisturbed.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use styx_core::{Atomic, Decode, IndexEntry, INDEX_ENTRY_SIZE};
use tracing::{info, warn};

use crate::config::CONFIG_FILE;
use crate::error::{Error, Result};
use crate::fs::{sync_dir, sync_parent};
use crate::log::Log;
use crate::segment::is_segment_file;
use crate::stat::Stat;

const DEFAULT_MODE: u32 = 0o644;

/// What to copy from one open file.
enum Limit {
    /// The whole file
    All,
    /// At most this many bytes
    Bytes(u64),
    /// Index entries with `offset <= end_offset`
    IndexUpTo(i64),
}

struct Source {
    name: String,
    file: File,
    limit: Limit,
}

impl Log {
    /// Write a backup of this log to `writer`.
    ///
    /// Returns the writer and the checkpoint the backup was cut at.
    pub async fn backup<W>(&self, writer: W) -> Result<(W, Stat)>
    where
        W: Write + Send + 'static,
    {
        self.check_open()?;
        let dir = self.path().to_path_buf();

        let (stat, sources) = {
            let state = self.inner().state.lock();
            let stat = state.stat();

            let mut records = Vec::new();
            let mut indexes = Vec::new();
            let mut sources = vec![Source {
                name: CONFIG_FILE.to_string(),
                file: File::open(dir.join(CONFIG_FILE))?,
                limit: Limit::All,
            }];
            for desc in state
                .segments
                .iter()
                .filter(|d| d.base_offset <= stat.end_offset)
            {
                records.push(Source {
                    name: desc.records_file_name(),
                    file: File::open(desc.records_path(&dir))?,
                    limit: Limit::Bytes((stat.end_offset - desc.base_offset) as u64),
                });
                indexes.push(Source {
                    name: desc.index_file_name(),
                    file: File::open(desc.index_path(&dir))?,
                    limit: Limit::IndexUpTo(stat.end_offset),
                });
            }
            sources.extend(records);
            sources.extend(indexes);
            (stat, sources)
        };

        let files = sources.len();
        let writer = tokio::task::spawn_blocking(move || write_archive(writer, sources)).await??;

        info!(
            path = ?dir,
            files,
            end_position = stat.end_position,
            end_offset = stat.end_offset,
            "Log backup complete"
        );
        Ok((writer, stat))
    }

    /// Recreate a log at `path` from a backup stream. `path` must not exist.
    pub async fn restore<R>(path: impl AsRef<Path>, reader: R) -> Result<()>
    where
        R: Read + Send + 'static,
    {
        let path = path.as_ref().to_path_buf();
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Err(Error::Exist),
            Err(e) => return Err(e.into()),
        }

        match restore_into(&path, reader).await {
            Ok(files) => {
                info!(path = ?path, files, "Log restored");
                Ok(())
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Restore failed, removing partial log");
                if let Err(cleanup) = tokio::fs::remove_dir_all(&path).await {
                    warn!(path = ?path, error = %cleanup, "Failed to remove partial log");
                }
                Err(e)
            }
        }
    }
}

async fn restore_into<R>(path: &Path, reader: R) -> Result<usize>
where
    R: Read + Send + 'static,
{
    let dir = path.to_path_buf();
    let files = tokio::task::spawn_blocking(move || extract_archive(&dir, reader)).await??;
    sync_dir(path).await?;
    sync_parent(path).await?;
    Ok(files)
}

// ============================================================================
// Blocking archive I/O
// ============================================================================

fn write_archive<W: Write>(writer: W, sources: Vec<Source>) -> Result<W> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for mut source in sources {
        let metadata = source.file.metadata()?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(file_mode(&metadata));
        header.set_mtime(
            metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs()),
        );

        match source.limit {
            Limit::All | Limit::Bytes(_) => {
                let len = match source.limit {
                    Limit::Bytes(n) => n.min(metadata.len()),
                    _ => metadata.len(),
                };
                header.set_size(len);
                header.set_cksum();
                builder.append_data(&mut header, &source.name, (&mut source.file).take(len))?;
            }
            Limit::IndexUpTo(end_offset) => {
                let mut data = Vec::with_capacity(metadata.len() as usize);
                source.file.read_to_end(&mut data)?;
                data.truncate(index_prefix_len(&data, end_offset));
                header.set_size(data.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, &source.name, data.as_slice())?;
            }
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Length of the leading run of well-formed index entries at or below
/// `end_offset`.
fn index_prefix_len(data: &[u8], end_offset: i64) -> usize {
    let mut entry = IndexEntry::default();
    let mut len = 0;
    while let Ok(n) = Atomic(&mut entry).decode(&data[len..]) {
        if entry.offset > end_offset {
            break;
        }
        len += n;
    }
    debug_assert_eq!(len % INDEX_ENTRY_SIZE, 0);
    len
}

fn extract_archive<R: Read>(dir: &Path, reader: R) -> Result<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut files = 0;
    let mut has_config = false;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != tar::EntryType::Regular {
            return Err(Error::corrupt("backup holds a non-file entry"));
        }
        let name = entry_name(&entry.path()?)?;
        if name == CONFIG_FILE {
            has_config = true;
        } else if !is_segment_file(&name) {
            return Err(Error::corrupt(format!("unexpected file {name} in backup")));
        }

        let target: PathBuf = dir.join(&name);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)?;
        std::io::copy(&mut entry, &mut file)?;
        set_mode(&file, entry.header().mode().unwrap_or(DEFAULT_MODE))?;
        file.sync_all()?;
        files += 1;
    }

    if !has_config {
        return Err(Error::corrupt("backup has no config file"));
    }
    Ok(files)
}

/// Entry names must be a single plain file name.
fn entry_name(path: &Path) -> Result<String> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| Error::corrupt("backup entry name is not UTF-8")),
        _ => Err(Error::corrupt(format!(
            "backup entry {} is not a plain file name",
            path.display()
        ))),
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    DEFAULT_MODE
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
