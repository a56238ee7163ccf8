// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Failure severity and retry policy.
//!
//! Every collaborator failure is either __transient__, meaning the same
//! operation may succeed if attempted again later (a dropped connection, a
//! package index hiccup), or __fatal__, meaning an operator has to fix
//! something before retrying makes sense (missing binary, diverged history).
//! The poll loop retries transient failures with bounded exponential backoff.
//! Setup never retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a failure should be treated by an unattended caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retrying later may succeed.
    Transient,

    /// Operator intervention required.
    Fatal,
}

impl Severity {
    /// Check if failure may be retried.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transient)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

/// Bounded exponential backoff for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Consecutive attempts allowed for one poll cycle, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on any single delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay to wait before retry number `retry` (1-based).
    ///
    /// Doubles with each retry starting from the initial backoff, and never
    /// exceeds the maximum backoff.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1_u64.checked_shl(exponent).unwrap_or(u64::MAX))
            .min(self.max_backoff_ms);

        Duration::from_millis(millis)
    }

    /// Check if another attempt is allowed after `attempts` have failed.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}
