// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control access.
//!
//! The watcher only ever needs five things from git: clone the service
//! repository, tell which branch is checked out, read the local head commit,
//! read the head commit of a branch on the remote, and pull. These are
//! modeled by [`VersionControl`] so the watcher can be driven by a fake in
//! tests. [`Git2Repo`] implements them through libgit2.
//!
//! Commit identifiers are handed around as opaque hex strings.
//!
//! # Credentials
//!
//! Jacques does not manage secrets. Authentication is delegated to
//! [`auth_git2`], which tries the same sources git itself would: credential
//! helpers, the SSH agent, and default SSH keys.

use crate::retry::Severity;

use auth_git2::GitAuthenticator;
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Direction, ErrorClass, FetchOptions, RemoteCallbacks, Repository,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    future::Future,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument};

/// Name of the remote every clone is made from.
pub const REMOTE: &str = "origin";

/// Layer of indirection for version control access.
pub trait VersionControl: Send + Sync {
    /// Clone remote repository into path, checking out target branch.
    fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        path: &Path,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Name of the currently checked out branch, if HEAD is not detached.
    fn current_branch(&self, path: &Path) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Commit currently checked out in the working tree.
    fn local_head(&self, path: &Path) -> impl Future<Output = Result<String>> + Send;

    /// Commit at the tip of target branch on the remote.
    fn remote_head(&self, path: &Path, branch: &str) -> impl Future<Output = Result<String>> + Send;

    /// Bring working tree up to date with target branch on the remote.
    fn pull(&self, path: &Path, branch: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Version control access through libgit2.
///
/// Every operation opens the repository fresh and runs on tokio's blocking
/// pool, since libgit2 calls block.
#[derive(Debug, Default, Clone)]
pub struct Git2Repo;

impl Git2Repo {
    /// Construct new libgit2 accessor.
    pub fn new() -> Self {
        Self
    }
}

impl VersionControl for Git2Repo {
    async fn clone_repo(&self, url: &str, branch: &str, path: &Path) -> Result<()> {
        let (url, branch, path) = (url.to_owned(), branch.to_owned(), path.to_path_buf());
        blocking(move || clone_with_progress(&url, &branch, &path)).await
    }

    async fn current_branch(&self, path: &Path) -> Result<Option<String>> {
        let path = path.to_path_buf();
        blocking(move || {
            let repository = Repository::open(&path)?;
            if repository.head_detached()? {
                return Ok(None);
            }

            let head = repository.head()?;
            Ok(head.shorthand().map(str::to_owned))
        })
        .await
    }

    async fn local_head(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        blocking(move || {
            let repository = Repository::open(&path)?;
            let commit = repository.head()?.peel_to_commit()?;
            Ok(commit.id().to_string())
        })
        .await
    }

    async fn remote_head(&self, path: &Path, branch: &str) -> Result<String> {
        let (path, branch) = (path.to_path_buf(), branch.to_owned());
        blocking(move || list_remote_head(&path, &branch)).await
    }

    async fn pull(&self, path: &Path, branch: &str) -> Result<()> {
        let (path, branch) = (path.to_path_buf(), branch.to_owned());
        blocking(move || fast_forward(&path, &branch)).await
    }
}

/// Clone remote repository while displaying progress.
///
/// The progress bar is drawn on stderr and hides itself when stderr is not a
/// terminal, e.g., when running under a service manager.
#[instrument(skip(url, path), level = "debug")]
fn clone_with_progress(url: &str, branch: &str, path: &Path) -> Result<()> {
    info!("clone {url} ({branch}) into {:?}", path.display());
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_message(url.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));

    let authenticator = GitAuthenticator::default();
    let config = git2::Config::open_default()?;

    let progress = bar.clone();
    let mut throttle = Instant::now();
    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(&config));
    rc.transfer_progress(move |stats| {
        if throttle.elapsed() > Duration::from_millis(10) {
            throttle = Instant::now();
            progress.set_length(stats.total_objects() as u64);
            progress.set_position(stats.received_objects() as u64);
        }
        true
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(rc);
    let result = RepoBuilder::new()
        .branch(branch)
        .fetch_options(fo)
        .clone(url, path);
    bar.finish_and_clear();

    let repository = result?;
    debug!("cloned into {:?}", repository.path().display());

    Ok(())
}

#[instrument(skip(path), level = "debug")]
fn list_remote_head(path: &Path, branch: &str) -> Result<String> {
    let repository = Repository::open(path)?;
    let mut remote = repository.find_remote(REMOTE)?;
    let authenticator = GitAuthenticator::default();
    let config = repository.config()?;

    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(&config));
    let connection = remote.connect_auth(Direction::Fetch, Some(rc), None)?;

    // INVARIANT: Only match the branch itself, never a tag of the same name.
    let target = format!("refs/heads/{branch}");
    let head = connection
        .list()?
        .iter()
        .find(|head| head.name() == target)
        .map(|head| head.oid().to_string());

    head.ok_or_else(|| RepoError::BranchNotFound {
        branch: branch.to_owned(),
        remote: REMOTE.to_owned(),
    })
}

#[instrument(skip(path), level = "debug")]
fn fast_forward(path: &Path, branch: &str) -> Result<()> {
    let repository = Repository::open(path)?;
    let mut remote = repository.find_remote(REMOTE)?;
    let authenticator = GitAuthenticator::default();
    let config = repository.config()?;

    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(&config));
    let mut fo = FetchOptions::new();
    fo.remote_callbacks(rc);
    remote.fetch(&[branch], Some(&mut fo), None)?;

    let fetch_head = repository.find_reference("FETCH_HEAD")?;
    let fetched = repository.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repository.merge_analysis(&[&fetched])?;

    if analysis.is_up_to_date() {
        debug!("{branch} already up to date");
        return Ok(());
    }

    if !analysis.is_fast_forward() {
        return Err(RepoError::NotFastForward {
            branch: branch.to_owned(),
        });
    }

    let refname = format!("refs/heads/{branch}");
    let mut reference = repository.find_reference(&refname)?;
    reference.set_target(
        fetched.id(),
        &format!("jacques: fast-forward {branch} to {}", fetched.id()),
    )?;
    repository.set_head(&refname)?;
    repository.checkout_head(Some(CheckoutBuilder::default().force()))?;
    info!("fast-forwarded {branch} to {}", fetched.id());

    Ok(())
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await?
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Remote does not carry the tracked branch.
    #[error("branch {branch:?} not found on remote {remote:?}")]
    BranchNotFound { branch: String, remote: String },

    /// Local branch cannot be fast-forwarded to its upstream.
    #[error("cannot fast-forward {branch:?} to upstream, histories diverged")]
    NotFastForward { branch: String },

    /// Blocking git task did not run to completion.
    #[error("git task failed to complete")]
    Worker(#[from] tokio::task::JoinError),

    /// Path was expected to hold a git repository.
    #[error("{:?} is not a git repository", path.display())]
    NotARepository { path: PathBuf },
}

impl RepoError {
    /// Classify failure.
    ///
    /// Only network-level libgit2 failures are worth retrying.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Git2(err) => match err.class() {
                ErrorClass::Net | ErrorClass::Ssh | ErrorClass::Ssl => Severity::Transient,
                _ => Severity::Fatal,
            },
            _ => Severity::Fatal,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;
