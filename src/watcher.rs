// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Watched service lifecycle.
//!
//! A [`Watcher`] owns exactly one watched service. Its lifetime has three
//! phases:
//!
//! 1. __Setup__: bring the service from absent to running under the service
//!    manager. Idempotent, every completed step is skipped on a re-run. See
//!    [`Watcher::setup`].
//! 2. __Poll__: compare local and remote head commits every poll interval and
//!    redeploy on drift. See [`Watcher::poll_once`].
//! 3. __Teardown__: stop the service, no matter why polling ended. See
//!    [`Watcher::watch`].
//!
//! Both setup and polling record the commit the unit was last started from,
//! see [`crate::deployed`]. A watcher that died halfway through a redeploy
//! is finished by the next one.
//!
//! # Collaborators
//!
//! The watcher never talks to git, pip, or systemd directly. It goes through
//! [`VersionControl`], [`Installer`], and [`ServiceManager`], defaulting to
//! [`Git2Repo`], [`VenvInstaller`], and [`Systemd`].

mod poll;
mod setup;

#[cfg(test)]
pub(crate) mod testing;

pub use poll::PollOutcome;

use crate::{
    config::WatcherConfig,
    deployed::DeployedError,
    lock::{LockError, WatcherLock},
    repo::{Git2Repo, RepoError, VersionControl},
    retry::Severity,
    unit::{ServiceManager, Systemd, UnitError, UnitName},
    venv::{InstallError, Installer, VenvInstaller},
};

use futures::FutureExt;
use std::{future::Future, panic::AssertUnwindSafe};
use tracing::{error, info, instrument};

/// Watcher of a single service.
#[derive(Debug)]
pub struct Watcher<V = Git2Repo, I = VenvInstaller, S = Systemd>
where
    V: VersionControl,
    I: Installer,
    S: ServiceManager,
{
    pub(crate) config: WatcherConfig,
    pub(crate) unit: UnitName,
    pub(crate) repo: V,
    pub(crate) installer: I,
    pub(crate) units: S,
}

impl Watcher {
    /// Construct new watcher using git, venv, and systemd.
    pub fn new(config: WatcherConfig) -> Self {
        Self::with_collaborators(config, Git2Repo::new(), VenvInstaller::new(), Systemd::new())
    }
}

impl<V, I, S> Watcher<V, I, S>
where
    V: VersionControl,
    I: Installer,
    S: ServiceManager,
{
    /// Construct new watcher with custom collaborators.
    pub fn with_collaborators(config: WatcherConfig, repo: V, installer: I, units: S) -> Self {
        let unit = UnitName::for_service(config.name());
        Self {
            config,
            unit,
            repo,
            installer,
            units,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Service manager unit of the watched service.
    pub fn unit(&self) -> &UnitName {
        &self.unit
    }

    /// Claim the service, set it up, then watch it until shutdown.
    ///
    /// The instance lock is held for the whole call.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Lock`] if another watcher owns the service.
    /// - Return whatever [`Watcher::setup`] or [`Watcher::watch`] return.
    #[instrument(skip_all, level = "debug")]
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let _lock = WatcherLock::acquire(self.config.installation_path())?;
        self.setup().await?;
        self.watch(shutdown).await
    }

    /// Poll for drift until shutdown is requested or polling fails.
    ///
    /// The unit is stopped exactly once on every way out: a shutdown request,
    /// an error, or a panic. A polling error is reported in favor of a
    /// failure to stop, and a panic is resumed after the stop.
    ///
    /// # Errors
    ///
    /// - Return the error that ended polling.
    /// - Return [`WatchError::Unit`] if polling ended cleanly but the unit
    ///   could not be stopped.
    pub async fn watch(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let outcome = tokio::select! {
            result = AssertUnwindSafe(self.poll_loop()).catch_unwind() => result,
            () = shutdown => {
                info!("shutdown requested");
                Ok(Ok(()))
            }
        };

        let stopped = self.units.stop(&self.unit).await;
        info!("cleaning up {}", self.unit);

        match outcome {
            Ok(Ok(())) => Ok(stopped?),
            Ok(Err(err)) => {
                if let Err(stop_err) = stopped {
                    error!("failed to stop {}: {stop_err}", self.unit);
                }
                Err(err)
            }
            Err(panic) => {
                if let Err(stop_err) = stopped {
                    error!("failed to stop {}: {stop_err}", self.unit);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

/// Watcher error types.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Version control collaborator failed.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Isolated runtime collaborator failed.
    #[error(transparent)]
    Install(#[from] InstallError),

    /// Service manager collaborator failed.
    #[error(transparent)]
    Unit(#[from] UnitError),

    /// Service is owned by someone else.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Deployed commit record cannot be used.
    #[error(transparent)]
    Deployed(#[from] DeployedError),

    /// Clone is checked out on a different branch than the one tracked.
    #[error("clone is on {}, expected branch {expected:?}", found.as_deref().map_or("a detached HEAD".to_string(), |branch| format!("branch {branch:?}")))]
    BranchMismatch {
        expected: String,
        found: Option<String>,
    },
}

impl WatchError {
    /// Classify failure.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Repo(err) => err.severity(),
            Self::Install(err) => err.severity(),
            Self::Unit(err) => err.severity(),
            Self::Lock(_) | Self::Deployed(_) | Self::BranchMismatch { .. } => Severity::Fatal,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = WatchError> = std::result::Result<T, E>;
