// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Record of the deployed commit.
//!
//! The clone's head only says what was pulled, not what the service manager
//! is actually running. The commit that was last installed and (re)started is
//! kept in a small file inside the installation directory so that a new
//! watcher process can tell whether an earlier one died halfway through a
//! redeploy.

use std::{
    fs::{read_to_string, rename, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Name of the deployed commit record inside an installation directory.
pub const DEPLOYED_FILE: &str = "deployed";

/// Read deployed commit from record at target path.
///
/// A missing or empty record means nothing was deployed yet.
///
/// # Errors
///
/// - Return [`DeployedError::Io`] if the record exists but cannot be read.
pub fn read_deployed(path: impl AsRef<Path>) -> Result<Option<String>> {
    let path = path.as_ref();
    match read_to_string(path) {
        Ok(data) => {
            let commit = data.trim();
            Ok((!commit.is_empty()).then(|| commit.to_owned()))
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(DeployedError::Io {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

/// Replace deployed commit in record at target path.
///
/// # Errors
///
/// - Return [`DeployedError::Io`] if the record cannot be written.
pub fn record_deployed(path: impl AsRef<Path>, commit: &str) -> Result<()> {
    let path = path.as_ref();
    let staged = path.with_extension("new");
    let io_error = |err| DeployedError::Io {
        source: err,
        path: path.to_path_buf(),
    };

    // INVARIANT: Readers see either the old commit or the new one.
    write(&staged, format!("{commit}\n")).map_err(io_error)?;
    rename(&staged, path).map_err(io_error)?;
    debug!("recorded deployed commit {commit}");

    Ok(())
}

/// Deployed commit record error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployedError {
    /// Record cannot be read or written.
    #[error("failed to use deployed commit record {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = DeployedError> = std::result::Result<T, E>;
