//! Writer lock: one write-mode session per handle.
//!
//! Cross-platform (fs2) advisory lock on a marker file next to the handle:
//!   <dir>/<handle file name>.lock
//! The lock belongs to the open file description, so two independent opens in the same
//! process conflict exactly like two processes do.
//! Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const RETRY_STEP: Duration = Duration::from_millis(10);

pub struct WriterLock {
    file: std::fs::File,
    path: PathBuf,
}

impl WriterLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, retrying until `timeout` passes. Used by bootstrap only.
    /// Bounded: a writer in this very process may hold the lock for a long time.
    pub fn acquire_within(handle: &Path, timeout: Duration) -> Result<Self> {
        let (file, path) = open_lock_file(handle)?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file, path }),
                Err(e) if Instant::now() >= deadline => {
                    return Err(e).with_context(|| {
                        format!("lock {} still held after {:?}", path.display(), timeout)
                    });
                }
                Err(_) => std::thread::sleep(RETRY_STEP),
            }
        }
    }

    /// Try to acquire the lock. Returns Err if another writer holds it.
    pub fn try_acquire(handle: &Path) -> Result<Self> {
        let (file, path) = open_lock_file(handle)?;
        file.try_lock_exclusive()
            .with_context(|| format!("try_lock_exclusive failed: {}", path.display()))?;
        Ok(Self { file, path })
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        // fs2 unlock errors on drop are ignored; closing the file releases the lock anyway.
        let _ = self.file.unlock();
    }
}

pub fn lock_file_path(handle: &Path) -> PathBuf {
    let mut name = handle
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    handle.with_file_name(name)
}

fn open_lock_file(handle: &Path) -> Result<(std::fs::File, PathBuf)> {
    let path = lock_file_path(handle);
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    Ok((f, path))
}
