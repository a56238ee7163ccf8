// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process invocation.
//!
//! Installer and service manager collaborators are thin wrappers around
//! external programs. Every call goes through here so that output capture,
//! logging, and failure classification stay consistent. Children are killed
//! when their future is dropped, which lets a shutdown signal interrupt an
//! in-flight command.

use crate::retry::Severity;

use std::{
    ffi::OsStr,
    path::Path,
    process::Output,
};
use tokio::process::Command;
use tracing::debug;

/// Run external program to completion and collect its output.
///
/// Output from stdout and stderr is returned together as a [`String`] with
/// trailing newlines chomped.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if the program cannot be started.
/// - Return [`SyscallError::Failed`] if the program exits unsuccessfully.
pub async fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: Option<&Path>,
) -> Result<String> {
    let output = spawn(cmd.as_ref(), args, cwd).await?;
    let message = collect_message(&output);

    if !output.status.success() {
        return Err(SyscallError::Failed {
            program: cmd.as_ref().to_string_lossy().into_owned(),
            code: output.status.code(),
            message,
        });
    }

    Ok(message)
}

/// Run external program and only report whether it exited successfully.
///
/// Meant for query commands whose exit status is the answer, e.g.,
/// `systemctl is-active --quiet`.
///
/// # Errors
///
/// - Return [`SyscallError::Spawn`] if the program cannot be started.
pub async fn syscall_succeeds(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: Option<&Path>,
) -> Result<bool> {
    let output = spawn(cmd.as_ref(), args, cwd).await?;
    Ok(output.status.success())
}

async fn spawn(
    cmd: &OsStr,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: Option<&Path>,
) -> Result<Output> {
    let mut command = Command::new(cmd);
    command.args(args).kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    debug!("run {:?}", command.as_std());

    command.output().await.map_err(|err| SyscallError::Spawn {
        source: err,
        program: cmd.to_string_lossy().into_owned(),
    })
}

fn collect_message(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(stdout.as_str());
    }

    if !stderr.is_empty() {
        if !message.is_empty() && !message.ends_with('\n') {
            message.push('\n');
        }
        message.push_str(stderr.as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    message.trim_end_matches(['\r', '\n']).to_string()
}

/// External process error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Program could not be started at all.
    #[error("failed to spawn {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Program ran but exited unsuccessfully.
    #[error("command {program:?} failed with exit code {code:?}:\n{message}")]
    Failed {
        program: String,
        code: Option<i32>,
        message: String,
    },
}

impl SyscallError {
    /// Classify failure.
    ///
    /// A program that cannot be spawned stays unspawnable until someone fixes
    /// the host. A program that ran and failed may succeed on a later attempt.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Spawn { .. } => Severity::Fatal,
            Self::Failed { .. } => Severity::Transient,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;
