// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Self-updating deployment watcher.
//!
//! Jacques keeps a Python service running as the latest commit of a branch in
//! a remote git repository. Given a [`WatcherDefinition`], it clones the
//! repository, installs the service into an isolated virtual environment,
//! registers it as a transient systemd unit, then polls the remote for new
//! commits. Each new commit is pulled, reinstalled, and restarted. When the
//! watcher stops for any reason, so does the service.
//!
//! # Layout
//!
//! Every watched service gets two directories named after it:
//!
//! - `<installation root>/<name>` holds the virtual environment, the
//!   instance lock, and the record of the deployed commit.
//! - `<git root>/<name>` holds the clone.
//!
//! See [`path::Roots`] for the defaults.

pub mod config;
pub mod deployed;
pub mod lock;
pub mod path;
pub mod repo;
pub mod retry;
pub mod syscall;
pub mod unit;
pub mod venv;
pub mod watcher;

#[doc(inline)]
pub use config::{WatcherConfig, WatcherDefinition};

#[doc(inline)]
pub use watcher::{PollOutcome, WatchError, Watcher};
