//! Filesystem moves with an explicit copy+remove fallback.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};

/// Which sources may fall back to copy+remove when an atomic rename is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Directories only (rename/move).
    DirsOnly,
    /// Directories and files (trash moves, staged uploads).
    Any,
}

/// Rename failures that copy+remove can get around (locks, permission quirks, other devices).
fn is_recoverable(e: &io::Error) -> bool {
    // EXDEV: staging or trash on another filesystem
    e.kind() == io::ErrorKind::PermissionDenied || (cfg!(unix) && e.raw_os_error() == Some(18))
}

/// Move `from` to `to`, which must not exist. Falls back to copy+remove when the
/// rename is refused and `policy` allows it for this kind of source.
pub async fn move_entry(from: &Path, to: &Path, policy: Fallback) -> StoreResult<()> {
    let err = match tokio::fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    let is_dir = tokio::fs::symlink_metadata(from).await.map(|m| m.is_dir()).unwrap_or(false);
    let allowed = is_dir || policy == Fallback::Any;
    if !(allowed && is_recoverable(&err)) {
        return Err(StoreError::io("move", err));
    }
    warn!(
        from = %from.display(),
        to = %to.display(),
        is_dir,
        error = %err,
        "rename refused; falling back to copy+remove"
    );
    if is_dir {
        copy_dir_recursive(from.to_path_buf(), to.to_path_buf()).await?;
        tokio::fs::remove_dir_all(from).await.map_err(|e| StoreError::io("remove source", e))?;
    } else {
        tokio::fs::copy(from, to).await.map_err(|e| StoreError::io("copy", e))?;
        tokio::fs::remove_file(from).await.map_err(|e| StoreError::io("remove source", e))?;
    }
    Ok(())
}

/// Copy a directory tree. Symlinks are recreated as-is on unix and skipped elsewhere.
pub async fn copy_dir_recursive(from: PathBuf, to: PathBuf) -> StoreResult<()> {
    tokio::task::spawn_blocking(move || copy_dir_blocking(&from, &to))
        .await
        .map_err(|e| StoreError::io("copy", io::Error::other(e)))?
        .map_err(|e| StoreError::io("copy", e))
}

fn copy_dir_blocking(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry.path().strip_prefix(from).map_err(io::Error::other)?;
        let dest = to.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if ft.is_file() {
            std::fs::copy(entry.path(), &dest)?;
        } else if ft.is_symlink() {
            #[cfg(unix)]
            {
                let target = std::fs::read_link(entry.path())?;
                std::os::unix::fs::symlink(target, &dest)?;
            }
        }
    }
    Ok(())
}
