//! Atomic directory swap (C7): robust rename/remove with lingering-handle retry, the
//! cross-device copy fallback, and the install/update swap-with-rollback sequence.
//!
//! The low-level helpers here operate only on `std::path::Path` and
//! `std::io::ErrorKind` and never touch `tokio`, so they can be exercised directly
//! with `tempfile::TempDir` fixtures without a runtime.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::package::PackageName;

const RETRY_ATTEMPTS: u32 = 5;

/// EXDEV: rename crosses filesystem boundaries.
const EXDEV: i32 = 18;

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(50 + (attempt as u64 * 12).min(50))
}

/// Permission/sharing errors are worth retrying (another process may be holding a
/// handle open, as indexers are prone to do). Errors that indicate a structural
/// problem with the path itself, like an existing hard link, are not.
fn is_retryable(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock)
}

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(EXDEV)
}

/// Rename `from` to `to`, retrying on transient lingering-handle errors.
pub fn robust_rename_sync(from: &Path, to: &Path) -> io::Result<()> {
    let mut attempt = 0;
    loop {
        match std::fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(err) if is_retryable(err.kind()) && attempt + 1 < RETRY_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(backoff(attempt));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Remove a directory tree, retrying on transient lingering-handle errors. A missing
/// path is treated as success.
pub fn robust_remove_sync(path: &Path) -> io::Result<()> {
    let mut attempt = 0;
    loop {
        match std::fs::remove_dir_all(path) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) if is_retryable(err.kind()) && attempt + 1 < RETRY_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(backoff(attempt));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Recursively copy a directory tree, preserving file modes and symlinks (without
/// following a symlink's target out of the source tree).
pub fn copy_dir_recursive_sync(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::create_dir_all(to)?;

    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest = to.join(entry.file_name());

        if file_type.is_symlink() {
            let link_target = std::fs::read_link(entry.path())?;
            symlink(&link_target, &dest)?;
        } else if file_type.is_dir() {
            copy_dir_recursive_sync(&entry.path(), &dest)?;
            preserve_mode(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
            preserve_mode(&entry.path(), &dest)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(unix)]
fn preserve_mode(source: &Path, dest: &Path) -> io::Result<()> {
    let metadata = std::fs::metadata(source)?;
    std::fs::set_permissions(dest, metadata.permissions())
}

#[cfg(not(unix))]
fn preserve_mode(_source: &Path, _dest: &Path) -> io::Result<()> {
    Ok(())
}

/// Move a directory tree from `from` to `to`, falling back to recursive copy+remove
/// when `rename` fails because the two paths live on different filesystems.
pub fn move_directory_sync(from: &Path, to: &Path) -> io::Result<()> {
    match robust_rename_sync(from, to) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => {
            copy_dir_recursive_sync(from, to)?;
            robust_remove_sync(from)
        }
        Err(err) => Err(err),
    }
}

fn backup_path(target: &Path) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let file_name = target.file_name().unwrap_or_default().to_string_lossy();
    target.with_file_name(format!("{file_name}.bak.{nanos}"))
}

fn atomic_error(name: &PackageName, target: &Path, err: io::Error) -> Error {
    Error::AtomicSwapFailed {
        name: name.clone(),
        target: target.to_owned(),
        reason: err.to_string(),
        source: Some(err),
    }
}

/// Swap `staging_source` into `target`, backing up and restoring any existing
/// directory at `target` on failure. Synchronous; run inside `spawn_blocking`.
fn swap_into_place_sync(name: &PackageName, staging_source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| Error::Io { path: parent.to_owned(), source })?;
    }

    if !target.exists() {
        return move_directory_sync(staging_source, target).map_err(|err| atomic_error(name, target, err));
    }

    let backup = backup_path(target);
    move_directory_sync(target, &backup).map_err(|err| atomic_error(name, target, err))?;

    match move_directory_sync(staging_source, target) {
        Ok(()) => {
            let cleanup_path = backup.clone();
            std::thread::spawn(move || {
                if let Err(err) = robust_remove_sync(&cleanup_path) {
                    tracing::warn!(backup = %cleanup_path.display(), %err, "failed to remove install backup");
                }
            });
            Ok(())
        }
        Err(swap_err) => match move_directory_sync(&backup, target) {
            Ok(()) => Err(atomic_error(name, target, swap_err)),
            Err(rollback_err) => Err(Error::AtomicSwapFailed {
                name: name.clone(),
                target: target.to_owned(),
                reason: format!(
                    "swap failed ({swap_err}) and rollback also failed ({rollback_err})"
                ),
                source: Some(rollback_err),
            }),
        },
    }
}

/// Asynchronous wrapper around [`swap_into_place_sync`], run on the blocking pool.
pub async fn swap_into_place(name: &PackageName, staging_source: PathBuf, target: PathBuf) -> Result<()> {
    let name = name.clone();
    tokio::task::spawn_blocking(move || swap_into_place_sync(&name, &staging_source, &target))
        .await
        .expect("installer swap task panicked")
}

/// Remove the directory at `target`, if present. Synchronous; run inside
/// `spawn_blocking`.
pub async fn remove_target(name: &PackageName, target: PathBuf) -> Result<()> {
    let name = name.clone();
    tokio::task::spawn_blocking(move || {
        robust_remove_sync(&target).map_err(|source| Error::AtomicSwapFailed {
            name: name.clone(),
            target: target.clone(),
            reason: source.to_string(),
            source: Some(source),
        })
    })
    .await
    .expect("installer remove task panicked")
}
