// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    deployed::{read_deployed, record_deployed},
    repo::{RepoError, VersionControl},
    unit::ServiceManager,
    venv::Installer,
    watcher::{Result, WatchError, Watcher},
};

use tracing::{debug, info, instrument};

impl<V, I, S> Watcher<V, I, S>
where
    V: VersionControl,
    I: Installer,
    S: ServiceManager,
{
    /// Bring watched service from absent to running under the service manager.
    ///
    /// Clones the repository unless the clone already exists, installs the
    /// isolated runtime unless the service executable already exists, then
    /// registers the unit. Safe to run again after any failure.
    ///
    /// An existing installation is reinstalled when the recorded deployed
    /// commit differs from the clone's head, which happens when an earlier
    /// watcher pulled but died before restarting. The clone's head is
    /// recorded as deployed only once the unit is registered.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::NotARepository`] if the clone path is a
    ///   directory without a git repository in it.
    /// - Return [`WatchError::BranchMismatch`] if the clone is not on the
    ///   tracked branch.
    /// - Return [`WatchError::Deployed`] if the deployed commit record cannot
    ///   be used.
    /// - Return whatever collaborator fails first. Nothing is retried.
    #[instrument(skip(self), level = "debug")]
    pub async fn setup(&self) -> Result<()> {
        info!("setting up {}", self.config.name());
        let git_path = self.config.git_path();

        if git_path.is_dir() {
            debug!("clone {:?} already exists", git_path.display());
            if !git_path.join(".git").is_dir() {
                return Err(RepoError::NotARepository {
                    path: git_path.to_path_buf(),
                }
                .into());
            }
        } else {
            info!("cloning git repository {}", self.config.git_address());
            self.repo
                .clone_repo(self.config.git_address(), self.config.git_branch(), git_path)
                .await?;
        }

        let branch = self.repo.current_branch(git_path).await?;
        if branch.as_deref() != Some(self.config.git_branch()) {
            return Err(WatchError::BranchMismatch {
                expected: self.config.git_branch().to_owned(),
                found: branch,
            });
        }

        let head = self.repo.local_head(git_path).await?;
        let deployed = read_deployed(self.config.deployed_path())?;
        if !self.config.service_exec().exists() {
            self.install().await?;
        } else if deployed.as_deref() != Some(head.as_str()) {
            info!(
                "{} was installed from {}, reinstalling at {head}",
                self.config.name(),
                deployed.as_deref().unwrap_or("an unknown commit")
            );
            self.installer.install_package(&self.config).await?;
        } else {
            debug!("{:?} already installed", self.config.service_exec().display());
        }

        self.units
            .register(&self.unit, self.config.service_exec())
            .await?;
        record_deployed(self.config.deployed_path(), &head)?;

        Ok(())
    }

    async fn install(&self) -> Result<()> {
        info!("installing {} into fresh runtime", self.config.name());
        self.installer.create_runtime(&self.config).await?;
        self.installer.install_package(&self.config).await?;

        Ok(())
    }
}
