// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! In-memory collaborators that record every call into a shared journal.

use crate::{
    config::{WatcherConfig, WatcherDefinition},
    path::Roots,
    repo::{self, RepoError, VersionControl},
    retry::RetryPolicy,
    syscall::SyscallError,
    unit::{self, ServiceManager, UnitError, UnitName},
    venv::{self, InstallError, Installer},
    watcher::Watcher,
};

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Clone { url: String, branch: String },
    CurrentBranch,
    LocalHead,
    RemoteHead(String),
    Pull(String),
    CreateRuntime,
    InstallPackage,
    Register { unit: String, exec: PathBuf },
    Restart(String),
    Stop(String),
}

impl Call {
    fn is_query(&self) -> bool {
        matches!(self, Self::CurrentBranch | Self::LocalHead | Self::RemoteHead(_))
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    fn record(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Calls that change something, i.e., everything but queries.
    pub(crate) fn effects(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|call| !call.is_query()).collect()
    }

    pub(crate) fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|recorded| *recorded == call).count()
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub(crate) fn transient_failure(program: &str) -> SyscallError {
    SyscallError::Failed {
        program: program.into(),
        code: Some(1),
        message: "temporary failure in name resolution".into(),
    }
}

#[derive(Debug)]
struct RepoState {
    local: String,
    remote: String,
    branch: Option<String>,
    pull_failures: VecDeque<RepoError>,
    remote_failures: VecDeque<RepoError>,
    panic_on_remote: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeRepo {
    journal: Journal,
    state: Arc<Mutex<RepoState>>,
}

impl FakeRepo {
    fn new(journal: Journal) -> Self {
        let state = RepoState {
            local: "a1".into(),
            remote: "a1".into(),
            branch: Some("main".into()),
            pull_failures: VecDeque::new(),
            remote_failures: VecDeque::new(),
            panic_on_remote: false,
        };

        Self {
            journal,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn set_heads(&self, local: &str, remote: &str) {
        let mut state = self.state.lock().unwrap();
        state.local = local.into();
        state.remote = remote.into();
    }

    pub(crate) fn push_upstream(&self, commit: &str) {
        self.state.lock().unwrap().remote = commit.into();
    }

    pub(crate) fn set_branch(&self, branch: Option<&str>) {
        self.state.lock().unwrap().branch = branch.map(str::to_owned);
    }

    pub(crate) fn fail_pull(&self, error: RepoError) {
        self.state.lock().unwrap().pull_failures.push_back(error);
    }

    pub(crate) fn fail_remote_head(&self, error: RepoError) {
        self.state.lock().unwrap().remote_failures.push_back(error);
    }

    pub(crate) fn panic_on_remote_head(&self) {
        self.state.lock().unwrap().panic_on_remote = true;
    }
}

impl VersionControl for FakeRepo {
    async fn clone_repo(&self, url: &str, branch: &str, path: &Path) -> repo::Result<()> {
        self.journal.record(Call::Clone {
            url: url.into(),
            branch: branch.into(),
        });
        std::fs::create_dir_all(path.join(".git")).unwrap();

        let mut state = self.state.lock().unwrap();
        state.local = state.remote.clone();
        state.branch = Some(branch.into());

        Ok(())
    }

    async fn current_branch(&self, _path: &Path) -> repo::Result<Option<String>> {
        self.journal.record(Call::CurrentBranch);
        Ok(self.state.lock().unwrap().branch.clone())
    }

    async fn local_head(&self, _path: &Path) -> repo::Result<String> {
        self.journal.record(Call::LocalHead);
        Ok(self.state.lock().unwrap().local.clone())
    }

    async fn remote_head(&self, _path: &Path, branch: &str) -> repo::Result<String> {
        self.journal.record(Call::RemoteHead(branch.into()));
        let outcome = {
            let mut state = self.state.lock().unwrap();
            if state.panic_on_remote {
                None
            } else {
                Some(match state.remote_failures.pop_front() {
                    Some(error) => Err(error),
                    None => Ok(state.remote.clone()),
                })
            }
        };

        // INVARIANT: Never panic while holding the state lock.
        outcome.unwrap_or_else(|| panic!("remote went away"))
    }

    async fn pull(&self, _path: &Path, branch: &str) -> repo::Result<()> {
        self.journal.record(Call::Pull(branch.into()));
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.pull_failures.pop_front() {
            return Err(error);
        }
        state.local = state.remote.clone();

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeInstaller {
    journal: Journal,
    failures: Arc<Mutex<VecDeque<InstallError>>>,
}

impl FakeInstaller {
    pub(crate) fn fail_install(&self, error: impl Into<InstallError>) {
        self.failures.lock().unwrap().push_back(error.into());
    }
}

impl Installer for FakeInstaller {
    async fn create_runtime(&self, config: &WatcherConfig) -> venv::Result<()> {
        self.journal.record(Call::CreateRuntime);
        std::fs::create_dir_all(config.bin_path()).unwrap();

        Ok(())
    }

    async fn install_package(&self, config: &WatcherConfig) -> venv::Result<()> {
        self.journal.record(Call::InstallPackage);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        std::fs::create_dir_all(config.bin_path()).unwrap();
        std::fs::write(config.service_exec(), "#!/bin/sh\n").unwrap();

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeUnits {
    journal: Journal,
    stop_fails: Arc<Mutex<bool>>,
}

impl FakeUnits {
    pub(crate) fn fail_stop(&self) {
        *self.stop_fails.lock().unwrap() = true;
    }
}

impl ServiceManager for FakeUnits {
    async fn register(&self, unit: &UnitName, exec: &Path) -> unit::Result<()> {
        self.journal.record(Call::Register {
            unit: unit.to_string(),
            exec: exec.to_path_buf(),
        });

        Ok(())
    }

    async fn restart(&self, unit: &UnitName) -> unit::Result<()> {
        self.journal.record(Call::Restart(unit.to_string()));

        Ok(())
    }

    async fn stop(&self, unit: &UnitName) -> unit::Result<()> {
        self.journal.record(Call::Stop(unit.to_string()));
        if *self.stop_fails.lock().unwrap() {
            return Err(UnitError::from(transient_failure("systemctl")));
        }

        Ok(())
    }
}

/// Watched service `svc1` laid out in a temporary directory.
pub(crate) struct Fixture {
    tmp: TempDir,
    config: WatcherConfig,
    pub(crate) journal: Journal,
    pub(crate) repo: FakeRepo,
    pub(crate) installer: FakeInstaller,
    pub(crate) units: FakeUnits,
}

impl Fixture {
    pub(crate) fn new() -> anyhow::Result<Self> {
        Self::with_retry(RetryPolicy::default())
    }

    pub(crate) fn with_retry(retry: RetryPolicy) -> anyhow::Result<Self> {
        let tmp = tempfile::tempdir()?;
        let roots = Roots::new(tmp.path().join("installation"), tmp.path().join("git"));
        let mut definition =
            WatcherDefinition::new("svc1", "svc1d", "https://example/repo.git", "main");
        definition.retry = retry;
        let config = WatcherConfig::new(definition, &roots)?;

        let journal = Journal::default();
        Ok(Self {
            tmp,
            config,
            repo: FakeRepo::new(journal.clone()),
            installer: FakeInstaller {
                journal: journal.clone(),
                failures: Arc::default(),
            },
            units: FakeUnits {
                journal: journal.clone(),
                stop_fails: Arc::default(),
            },
            journal,
        })
    }

    pub(crate) fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub(crate) fn watcher(&self) -> Watcher<FakeRepo, FakeInstaller, FakeUnits> {
        Watcher::with_collaborators(
            self.config.clone(),
            self.repo.clone(),
            self.installer.clone(),
            self.units.clone(),
        )
    }
}
