//! File locking and atomic writes for the state file
//!
//! - Advisory locks (fs2/flock) on a sibling `<path>.lock` file
//! - Lock timeout with retry, surfaced as `Error::LockFailed`
//! - Atomic replace (write temp + fsync + rename)
//!
//! Several tickwatch processes (a long-running `run` plus one-shot CLI
//! commands) may touch the same state file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Default lock timeout
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for a lock
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // Windows reports sharing/lock violations as raw OS errors.
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// The lock file guarding `path`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.lock", path.display()))
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Exclusive advisory lock, released on drop.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, creating it if needed.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        let start = Instant::now();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(FileLock {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if is_lock_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// `Ok(None)` if someone else holds the lock.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if is_lock_contended(&e) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Replace `path` with `data` so readers see either the old or the new
/// content. Does not lock.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Same directory, so the rename stays on one filesystem.
    let temp_path = path.with_extension(format!(
        "{}.tmp.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        std::process::id()
    ));

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read `path` under its lock; a missing file reads as `None`.
pub fn read_locked(path: impl AsRef<Path>, timeout: Duration) -> Result<Option<Vec<u8>>> {
    let path = path.as_ref();
    let _lock = FileLock::acquire(lock_path_for(path), timeout)?;
    read_if_exists(path)
}

/// Read-modify-write `path` while holding its lock.
///
/// `update` receives the current content (`None` if the file is missing)
/// and returns the bytes to write atomically.
pub fn update_locked<F>(path: impl AsRef<Path>, timeout: Duration, update: F) -> Result<()>
where
    F: FnOnce(Option<Vec<u8>>) -> Result<Vec<u8>>,
{
    let path = path.as_ref();
    let _lock = FileLock::acquire(lock_path_for(path), timeout)?;
    let current = read_if_exists(path)?;
    let next = update(current)?;
    write_atomic(path, &next)
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::Io(err)),
    }
}
