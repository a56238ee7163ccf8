// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exclusive ownership of a watched service.
//!
//! Only one watcher may operate on a given service at a time. Ownership is
//! claimed through an advisory lock on a file inside the service's
//! installation directory, held for as long as the watcher lives. The file
//! contains the pid of its owner, which makes a stuck lock easy to trace.

use fs2::FileExt;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Name of the lock file inside an installation directory.
pub const LOCK_FILE: &str = "jacques.lock";

/// Held exclusive lock on a watched service.
///
/// Released when dropped.
#[derive(Debug)]
pub struct WatcherLock {
    file: File,
    path: PathBuf,
}

impl WatcherLock {
    /// Claim exclusive lock inside target directory.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Held`] if another process already holds the lock.
    /// - Return [`LockError::Io`] if lock file cannot be opened or written.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(LOCK_FILE);
        let io_error = |err| LockError::Io {
            source: err,
            path: path.clone(),
        };

        // INVARIANT: Never truncate before holding the lock, the pid inside
        // belongs to the current owner.
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_error)?;

        FileExt::try_lock_exclusive(&file).map_err(|err| {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                LockError::Held { path: path.clone() }
            } else {
                io_error(err)
            }
        })?;

        file.set_len(0).map_err(io_error)?;
        writeln!(file, "{}", std::process::id()).map_err(io_error)?;
        debug!("acquired lock {:?}", path.display());

        Ok(Self { file, path })
    }

    /// Path to the lock file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl Drop for WatcherLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("released lock {:?}", self.path.display());
    }
}

/// Instance lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another watcher owns the service.
    #[error("another watcher holds {:?}", path.display())]
    Held { path: PathBuf },

    /// Lock file cannot be used.
    #[error("failed to use lock file {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LockError> = std::result::Result<T, E>;
