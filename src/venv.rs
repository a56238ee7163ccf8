// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Isolated runtime management.
//!
//! Every watched service runs out of its own Python virtual environment under
//! its installation directory. The environment is created once, and the
//! service package is (re)installed into it from the local clone whenever a
//! new commit is deployed.

use crate::{
    config::WatcherConfig,
    retry::Severity,
    syscall::{syscall_non_interactive, SyscallError},
};

use std::{ffi::OsString, future::Future};
use tracing::{debug, info, instrument};

/// Layer of indirection for isolated runtime management.
pub trait Installer: Send + Sync {
    /// Create isolated runtime and bring its baseline tooling up to date.
    fn create_runtime(&self, config: &WatcherConfig) -> impl Future<Output = Result<()>> + Send;

    /// Install or upgrade the service package from the local clone.
    fn install_package(&self, config: &WatcherConfig) -> impl Future<Output = Result<()>> + Send;
}

/// Isolated runtime through `python -m venv` and pip.
#[derive(Debug, Default, Clone)]
pub struct VenvInstaller;

impl VenvInstaller {
    /// Construct new venv installer.
    pub fn new() -> Self {
        Self
    }
}

impl Installer for VenvInstaller {
    #[instrument(skip(self, config), level = "debug")]
    async fn create_runtime(&self, config: &WatcherConfig) -> Result<()> {
        info!("create venv at {:?}", config.venv_path().display());
        syscall_non_interactive(
            config.python_exec_path(),
            VENV_ARGS,
            Some(config.installation_path()),
        )
        .await?;

        info!("upgrade pip, setuptools, wheel");
        syscall_non_interactive(
            config.pip_exec(),
            BOOTSTRAP_ARGS,
            Some(config.installation_path()),
        )
        .await?;

        Ok(())
    }

    #[instrument(skip(self, config), level = "debug")]
    async fn install_package(&self, config: &WatcherConfig) -> Result<()> {
        info!("install package {}", config.name());
        let output = syscall_non_interactive(
            config.pip_exec(),
            pip_install_args(config),
            Some(config.git_path()),
        )
        .await?;
        debug!("{output}");

        Ok(())
    }
}

// Relative to the installation directory, matching `WatcherConfig::venv_path`.
const VENV_ARGS: [&str; 3] = ["-m", "venv", "venv"];

const BOOTSTRAP_ARGS: [&str; 5] = ["install", "--upgrade", "pip", "setuptools", "wheel"];

fn pip_install_args(config: &WatcherConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["install".into(), "--upgrade".into()];
    if config.force_reinstall() {
        args.push("--force-reinstall".into());
    }
    args.push(config.git_path().join(".").into_os_string());

    args
}

/// Isolated runtime error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Interpreter or pip invocation failed.
    #[error(transparent)]
    Syscall(#[from] SyscallError),
}

impl InstallError {
    /// Classify failure.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Syscall(err) => err.severity(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;
