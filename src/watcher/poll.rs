// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    deployed::{read_deployed, record_deployed},
    repo::VersionControl,
    unit::ServiceManager,
    venv::Installer,
    watcher::{Result, Watcher},
};

use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// What a single poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Deployed commit matches upstream.
    UpToDate,

    /// Service was reinstalled and restarted on a new commit.
    ///
    /// `from` is `None` if nothing was recorded as deployed before.
    Redeployed { from: Option<String>, to: String },
}

impl<V, I, S> Watcher<V, I, S>
where
    V: VersionControl,
    I: Installer,
    S: ServiceManager,
{
    /// Run poll cycles forever, sleeping the poll interval between them.
    ///
    /// Starts from the recorded deployed commit, so a missing record or one
    /// that lags behind the clone triggers a redeploy on the first cycle.
    /// Transient failures are retried with backoff until the retry policy
    /// runs out. Only returns on failure.
    pub(crate) async fn poll_loop(&self) -> Result<()> {
        let mut deployed = read_deployed(self.config.deployed_path())?;
        let policy = self.config.retry();
        let mut attempts = 0;
        info!(
            "watching {} on {} from {}",
            self.config.git_address(),
            self.config.git_branch(),
            deployed.as_deref().unwrap_or("an unknown commit")
        );

        loop {
            attempts += 1;
            match self.poll_once(&mut deployed).await {
                Ok(outcome) => {
                    debug!("poll cycle finished: {outcome:?}");
                    attempts = 0;
                    sleep(self.config.poll_interval()).await;
                }
                Err(err) if err.severity().is_transient() && policy.allows_retry(attempts) => {
                    let delay = policy.backoff(attempts);
                    warn!(
                        "poll cycle failed (attempt {attempts}/{}), retrying in {delay:?}: {err}",
                        policy.max_attempts
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run one drift check, redeploying if needed.
    ///
    /// Pulls when local and remote heads differ. Reinstalls and restarts when
    /// the (possibly pulled) local head differs from the `deployed` commit,
    /// and only then records the new commit and advances `deployed`. A cycle
    /// that failed halfway is thus finished by the next one instead of
    /// leaving the service on stale code.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Deployed`] if the new commit cannot be recorded.
    /// - Return whatever collaborator fails first.
    ///
    /// [`WatchError::Deployed`]: crate::watcher::WatchError::Deployed
    #[instrument(skip(self), level = "debug")]
    pub async fn poll_once(&self, deployed: &mut Option<String>) -> Result<PollOutcome> {
        let git_path = self.config.git_path();
        let branch = self.config.git_branch();

        let local = self.repo.local_head(git_path).await?;
        let remote = self.repo.remote_head(git_path, branch).await?;

        let head = if local == remote {
            local
        } else {
            info!("drift detected on {branch}: local {local}, remote {remote}");
            self.repo.pull(git_path, branch).await?;
            self.repo.local_head(git_path).await?
        };

        if deployed.as_deref() == Some(head.as_str()) {
            return Ok(PollOutcome::UpToDate);
        }

        self.installer.install_package(&self.config).await?;
        self.units.restart(&self.unit).await?;
        record_deployed(self.config.deployed_path(), &head)?;
        info!("redeployed {} at {head}", self.unit);

        let from = deployed.replace(head.clone());
        Ok(PollOutcome::Redeployed { from, to: head })
    }
}
