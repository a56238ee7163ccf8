// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Filesystem roots.
//!
//! Jacques keeps everything it manages under two root directories: the
//! __installation root__, which holds one isolated runtime per watched
//! service, and the __clone root__, which holds one git clone per watched
//! service. Both are plain values handed to configuration construction, so
//! nothing in the crate reads them from global state.
//!
//! # Layout
//!
//! ```text
//! <installation_root>/<name>/venv/bin/<exec_name>
//! <installation_root>/<name>/jacques.lock
//! <clone_root>/<name>/.git
//! ```

use std::{
    fs::create_dir_all,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Default root for isolated runtimes of watched services.
pub const DEFAULT_INSTALLATION_ROOT: &str = "/opt/jacques/installation";

/// Default root for git clones of watched services.
pub const DEFAULT_GIT_ROOT: &str = "/opt/jacques/git";

/// Pair of root directories that every watched service is namespaced under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    installation: PathBuf,
    git: PathBuf,
}

impl Roots {
    /// Construct new set of roots.
    ///
    /// Does not touch the file system. Use [`Roots::ensure`] to create them.
    pub fn new(installation: impl Into<PathBuf>, git: impl Into<PathBuf>) -> Self {
        Self {
            installation: installation.into(),
            git: git.into(),
        }
    }

    /// Root holding per-service installation directories.
    pub fn installation(&self) -> &Path {
        self.installation.as_path()
    }

    /// Root holding per-service git clones.
    pub fn git(&self) -> &Path {
        self.git.as_path()
    }

    /// Create both roots if they are missing.
    ///
    /// Existing directories are left alone.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::CreateDir`] if either root cannot be created.
    pub fn ensure(&self) -> Result<()> {
        ensure_dir(&self.installation)?;
        ensure_dir(&self.git)?;

        Ok(())
    }
}

impl Default for Roots {
    fn default() -> Self {
        Self::new(DEFAULT_INSTALLATION_ROOT, DEFAULT_GIT_ROOT)
    }
}

/// Create directory and all of its parents if missing.
///
/// # Errors
///
/// - Return [`PathError::CreateDir`] if the directory cannot be created.
pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    debug!("ensure directory {:?}", path.display());
    create_dir_all(path).map_err(|err| PathError::CreateDir {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Path handling error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Directory could not be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_roots_live_under_opt() {
        let roots = Roots::default();
        assert_eq!(roots.installation(), Path::new("/opt/jacques/installation"));
        assert_eq!(roots.git(), Path::new("/opt/jacques/git"));
    }

    #[test]
    fn ensure_is_idempotent() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let roots = Roots::new(tmp.path().join("a/installation"), tmp.path().join("b/git"));

        roots.ensure()?;
        roots.ensure()?;

        assert!(roots.installation().is_dir());
        assert!(roots.git().is_dir());

        Ok(())
    }

    #[test]
    fn ensure_fails_when_root_is_a_file() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "")?;
        let roots = Roots::new(blocker.join("installation"), tmp.path().join("git"));

        let result = roots.ensure();
        assert!(matches!(result, Err(PathError::CreateDir { .. })));

        Ok(())
    }
}
