//! Advisory locking of a transfer using fd-lock
//!
//! Two processes pointed at the same destination directory must not append
//! to the same partial file. The lock is held for the whole transfer and is
//! released when the guard drops.

use super::ResumeError;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file guarding one product transfer
pub struct TransferLock {
    path: PathBuf,
    lock: RwLock<File>,
}

impl TransferLock {
    /// Open (creating if needed) the lock file at `path`.
    pub fn open(path: &Path) -> Result<Self, ResumeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            lock: RwLock::new(file),
        })
    }

    /// Try to take the exclusive lock without blocking.
    ///
    /// Fails immediately when another process holds it.
    pub fn try_exclusive(&mut self) -> Result<RwLockWriteGuard<'_, File>, ResumeError> {
        let path = self.path.display().to_string();
        self.lock.try_write().map_err(|e| {
            ResumeError::LockError(format!("{path} is held by another transfer: {e}"))
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
