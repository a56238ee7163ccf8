// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Service manager access.
//!
//! A watched service runs as a transient systemd unit named
//! `jacques-<name>.service`. The watcher needs to register it once, restart
//! it after every redeploy, and stop it when the watcher goes away.

use crate::{
    retry::Severity,
    syscall::{syscall_non_interactive, syscall_succeeds, SyscallError},
};

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    future::Future,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Prefix shared by every unit jacques registers.
pub const UNIT_PREFIX: &str = "jacques";

/// Name of the service manager unit of a watched service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitName(String);

impl UnitName {
    /// Derive unit name from the name of a watched service.
    pub fn for_service(name: impl AsRef<str>) -> Self {
        Self(format!("{UNIT_PREFIX}-{}.service", name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for UnitName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Layer of indirection for service manager access.
pub trait ServiceManager: Send + Sync {
    /// Make sure unit runs target executable.
    fn register(&self, unit: &UnitName, exec: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Restart unit.
    fn restart(&self, unit: &UnitName) -> impl Future<Output = Result<()>> + Send;

    /// Stop unit.
    fn stop(&self, unit: &UnitName) -> impl Future<Output = Result<()>> + Send;
}

/// Service manager access through systemd.
#[derive(Debug, Clone)]
pub struct Systemd {
    systemctl: PathBuf,
    systemd_run: PathBuf,
}

impl Systemd {
    /// Construct new systemd accessor using the programs found on `PATH`.
    pub fn new() -> Self {
        Self::with_programs("systemctl", "systemd-run")
    }

    /// Construct new systemd accessor using custom programs.
    pub fn with_programs(systemctl: impl Into<PathBuf>, systemd_run: impl Into<PathBuf>) -> Self {
        Self {
            systemctl: systemctl.into(),
            systemd_run: systemd_run.into(),
        }
    }

    async fn is_active(&self, unit: &UnitName) -> Result<bool> {
        let args = systemctl_args(&["is-active", "--quiet"], unit);
        Ok(syscall_succeeds(&self.systemctl, args, None).await?)
    }
}

impl Default for Systemd {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager for Systemd {
    /// Register transient unit running target executable.
    ///
    /// A unit that is still active from an earlier run cannot be registered
    /// twice, so it is restarted instead to pick up the current installation.
    /// A unit left in the failed state by a crashed service is reset first.
    #[instrument(skip(self, exec), level = "debug")]
    async fn register(&self, unit: &UnitName, exec: &Path) -> Result<()> {
        if self.is_active(unit).await? {
            info!("{unit} already active");
            return self.restart(unit).await;
        }

        // INVARIANT: systemd-run refuses a unit name that is still loaded.
        let args = systemctl_args(&["reset-failed"], unit);
        let reset = syscall_succeeds(&self.systemctl, args, None).await?;
        debug!("reset-failed {unit}: {reset}");

        info!("create systemd service {unit} running {:?}", exec.display());
        syscall_non_interactive(&self.systemd_run, systemd_run_args(unit, exec), None).await?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn restart(&self, unit: &UnitName) -> Result<()> {
        info!("restart systemd service {unit}");
        syscall_non_interactive(&self.systemctl, systemctl_args(&["restart"], unit), None).await?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop(&self, unit: &UnitName) -> Result<()> {
        info!("stop systemd service {unit}");
        syscall_non_interactive(&self.systemctl, systemctl_args(&["stop"], unit), None).await?;

        Ok(())
    }
}

fn systemctl_args(verb: &[&str], unit: &UnitName) -> Vec<OsString> {
    let mut args: Vec<OsString> = verb.iter().map(OsString::from).collect();
    args.push(unit.as_str().into());

    args
}

// Collected units are unloaded once they stop, even if they failed.
fn systemd_run_args(unit: &UnitName, exec: &Path) -> Vec<OsString> {
    vec![
        format!("--unit={unit}").into(),
        "--collect".into(),
        exec.as_os_str().to_os_string(),
    ]
}

/// Service manager error types.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    /// Service manager invocation failed.
    #[error(transparent)]
    Syscall(#[from] SyscallError),
}

impl UnitError {
    /// Classify failure.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Syscall(err) => err.severity(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = UnitError> = std::result::Result<T, E>;
