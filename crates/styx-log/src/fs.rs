//! Small filesystem helpers shared by the log modules.

use std::path::Path;

use tokio::fs::File;

/// fsync a directory so entry creations and removals are durable.
pub async fn sync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path).await?.sync_all().await
}

/// fsync the parent of `path`, if it has one.
pub async fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => sync_dir(parent).await,
        _ => sync_dir(Path::new(".")).await,
    }
}

/// fsync a file by path. A file that no longer exists is skipped, since
/// retention may delete a segment between being marked dirty and synced.
pub async fn sync_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match File::open(path).await {
        Ok(file) => {
            file.sync_all().await?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
