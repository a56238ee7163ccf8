// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! A watcher is described by a small JSON file. The raw file contents are
//! modeled by [`WatcherDefinition`], which only handles (de)serialization. A
//! [`WatcherConfig`] is then derived from a definition and a set of
//! [`Roots`], validating the definition and computing every path the watcher
//! will ever touch.
//!
//! # General Layout
//!
//! ```json
//! {
//!     "name": "svc1",
//!     "exec_name": "svc1d",
//!     "git_address": "https://example/repo.git",
//!     "git_branch": "main",
//!     "python_exec_path": "python3",
//!     "force_reinstall": false,
//!     "poll_interval_secs": 30,
//!     "retry": { "max_attempts": 5, "initial_backoff_ms": 1000, "max_backoff_ms": 60000 }
//! }
//! ```
//!
//! Only the first four fields are required. Unknown fields are rejected.

use crate::{
    deployed::DEPLOYED_FILE,
    path::{ensure_dir, PathError, Roots},
    retry::RetryPolicy,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::{debug, instrument};

fn default_python_exec_path() -> String {
    "python3".into()
}

fn default_poll_interval_secs() -> u64 {
    30
}

/// Raw watcher definition as written in the configuration file.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherDefinition {
    /// Unique name of the watched service.
    pub name: String,

    /// Executable installed into the isolated runtime that runs the service.
    pub exec_name: String,

    /// Remote URL to clone the service from.
    pub git_address: String,

    /// Branch to deploy and track.
    pub git_branch: String,

    /// Interpreter used to create the isolated runtime.
    #[serde(default = "default_python_exec_path")]
    pub python_exec_path: String,

    /// Force a clean reinstall of the package on every install.
    #[serde(default)]
    pub force_reinstall: bool,

    /// Seconds to sleep between two drift checks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Retry behavior of the poll loop.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl WatcherDefinition {
    /// Construct new definition with default optional settings.
    pub fn new(
        name: impl Into<String>,
        exec_name: impl Into<String>,
        git_address: impl Into<String>,
        git_branch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            exec_name: exec_name.into(),
            git_address: git_address.into(),
            git_branch: git_branch.into(),
            python_exec_path: default_python_exec_path(),
            force_reinstall: false,
            poll_interval_secs: default_poll_interval_secs(),
            retry: RetryPolicy::default(),
        }
    }

    /// Check that every field can be used safely to derive paths and unit names.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Invalid`] for the first offending field.
    pub fn validate(&self) -> Result<()> {
        validate_segment("name", &self.name)?;
        validate_segment("exec_name", &self.exec_name)?;
        validate_not_empty("git_address", &self.git_address)?;
        validate_not_empty("git_branch", &self.git_branch)?;
        validate_not_empty("python_exec_path", &self.python_exec_path)?;

        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs", "0", "must be greater than zero"));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0", "must be at least one"));
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(invalid(
                "retry.max_backoff_ms",
                self.retry.max_backoff_ms.to_string(),
                "must not be smaller than retry.initial_backoff_ms",
            ));
        }

        Ok(())
    }
}

impl FromStr for WatcherDefinition {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut definition: WatcherDefinition =
            serde_json::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on interpreter path.
        definition.python_exec_path = shellexpand::full(definition.python_exec_path.as_str())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned();

        Ok(definition)
    }
}

impl Display for WatcherDefinition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_json::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Fully derived watcher configuration.
///
/// Built once at startup and never mutated afterwards. All paths are pure
/// functions of the service name, the executable name, and the [`Roots`] it
/// was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    definition: WatcherDefinition,
    installation_path: PathBuf,
    venv_path: PathBuf,
    bin_path: PathBuf,
    pip_exec: PathBuf,
    service_exec: PathBuf,
    deployed_path: PathBuf,
    git_path: PathBuf,
}

impl WatcherConfig {
    /// Derive configuration from definition.
    ///
    /// Creates the installation directory of the service and the clone root
    /// if they do not exist yet. The clone directory itself is left for setup
    /// to create.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Invalid`] if definition fails validation.
    /// - Return [`ConfigError::Path`] if a directory cannot be created.
    #[instrument(skip(definition, roots), level = "debug")]
    pub fn new(definition: WatcherDefinition, roots: &Roots) -> Result<Self> {
        definition.validate()?;

        let installation_path = roots.installation().join(&definition.name);
        let venv_path = installation_path.join("venv");
        let bin_path = venv_path.join("bin");
        let pip_exec = bin_path.join("pip");
        let service_exec = bin_path.join(&definition.exec_name);
        let deployed_path = installation_path.join(DEPLOYED_FILE);
        let git_path = roots.git().join(&definition.name);

        ensure_dir(&installation_path)?;
        ensure_dir(roots.git())?;
        debug!(
            "derived paths for {}: installation {:?}, clone {:?}",
            definition.name,
            installation_path.display(),
            git_path.display()
        );

        Ok(Self {
            definition,
            installation_path,
            venv_path,
            bin_path,
            pip_exec,
            service_exec,
            deployed_path,
            git_path,
        })
    }

    /// Read configuration file at target path and derive configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ReadFile`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not a valid definition.
    /// - Return whatever [`WatcherConfig::new`] returns.
    pub fn load(path: impl AsRef<Path>, roots: &Roots) -> Result<Self> {
        let path = path.as_ref();
        let data = read_to_string(path).map_err(|err| ConfigError::ReadFile {
            source: err,
            path: path.to_path_buf(),
        })?;

        Self::new(data.parse()?, roots)
    }

    pub fn definition(&self) -> &WatcherDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name.as_str()
    }

    pub fn exec_name(&self) -> &str {
        self.definition.exec_name.as_str()
    }

    pub fn git_address(&self) -> &str {
        self.definition.git_address.as_str()
    }

    pub fn git_branch(&self) -> &str {
        self.definition.git_branch.as_str()
    }

    pub fn python_exec_path(&self) -> &str {
        self.definition.python_exec_path.as_str()
    }

    pub fn force_reinstall(&self) -> bool {
        self.definition.force_reinstall
    }

    /// Time to sleep between two drift checks.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.definition.poll_interval_secs)
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.definition.retry
    }

    /// Directory owning the isolated runtime and the instance lock.
    pub fn installation_path(&self) -> &Path {
        self.installation_path.as_path()
    }

    pub fn venv_path(&self) -> &Path {
        self.venv_path.as_path()
    }

    pub fn bin_path(&self) -> &Path {
        self.bin_path.as_path()
    }

    pub fn pip_exec(&self) -> &Path {
        self.pip_exec.as_path()
    }

    /// Executable that the service manager runs.
    pub fn service_exec(&self) -> &Path {
        self.service_exec.as_path()
    }

    /// Record of the commit the service was last installed and started from.
    pub fn deployed_path(&self) -> &Path {
        self.deployed_path.as_path()
    }

    /// Working tree of the git clone.
    pub fn git_path(&self) -> &Path {
        self.git_path.as_path()
    }
}

fn validate_not_empty(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, value, "must not be empty"));
    }

    Ok(())
}

// Value doubles as a path segment and as part of a systemd unit name.
fn validate_segment(field: &'static str, value: &str) -> Result<()> {
    validate_not_empty(field, value)?;

    if value.starts_with('.') {
        return Err(invalid(field, value, "must not start with '.'"));
    }

    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(invalid(
            field,
            value,
            format!("contains forbidden character {bad:?}"),
        ));
    }

    Ok(())
}

fn invalid(field: &'static str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.into(),
        reason: reason.into(),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file {:?}", path.display())]
    ReadFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error("malformed configuration: {0}")]
    Deserialize(#[source] serde_json::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(serde_json::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Field holds a value that cannot be used.
    #[error("invalid {field} {value:?}: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Failed to create a derived directory.
    #[error(transparent)]
    Path(#[from] PathError),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    fn roots_in(dir: &Path) -> Roots {
        Roots::new(dir.join("installation"), dir.join("git"))
    }

    #[test]
    fn deserialize_minimal_definition() -> anyhow::Result<()> {
        let result: WatcherDefinition = indoc! {r#"
            {
                "name": "svc1",
                "exec_name": "svc1d",
                "git_address": "https://example/repo.git",
                "git_branch": "main"
            }
        "#}
        .parse()?;

        let expect = WatcherDefinition::new("svc1", "svc1d", "https://example/repo.git", "main");
        assert_eq!(result, expect);
        assert_eq!(result.python_exec_path, "python3");
        assert!(!result.force_reinstall);
        assert_eq!(result.poll_interval_secs, 30);
        assert_eq!(result.retry, RetryPolicy::default());

        Ok(())
    }

    #[sealed_test(env = [("PYENV_ROOT", "/home/blah/.pyenv")])]
    fn deserialize_full_definition() -> anyhow::Result<()> {
        let result: WatcherDefinition = indoc! {r#"
            {
                "name": "svc1",
                "exec_name": "svc1d",
                "git_address": "git@example:repo.git",
                "git_branch": "release",
                "python_exec_path": "$PYENV_ROOT/shims/python3.12",
                "force_reinstall": true,
                "poll_interval_secs": 5,
                "retry": { "max_attempts": 2, "initial_backoff_ms": 10, "max_backoff_ms": 20 }
            }
        "#}
        .parse()?;

        let expect = WatcherDefinition {
            name: "svc1".into(),
            exec_name: "svc1d".into(),
            git_address: "git@example:repo.git".into(),
            git_branch: "release".into(),
            python_exec_path: "/home/blah/.pyenv/shims/python3.12".into(),
            force_reinstall: true,
            poll_interval_secs: 5,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff_ms: 10,
                max_backoff_ms: 20,
            },
        };
        assert_eq!(result, expect);

        Ok(())
    }

    #[test_case(r#"{"name":"a","exec_name":"b","git_address":"c","git_branch":"d","extra":1}"#; "unknown top level field")]
    #[test_case(r#"{"name":"a","exec_name":"b","git_address":"c","git_branch":"d","retry":{"tries":1}}"#; "unknown retry field")]
    #[test_case(r#"{"name":"a","exec_name":"b","git_address":"c"}"#; "missing branch")]
    #[test_case(r#"{"name":"a","exec_name":"b","git_address":"c","git_branch":"d""#; "truncated")]
    #[test]
    fn reject_malformed_definition(data: &str) {
        let result = data.parse::<WatcherDefinition>();
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test_case("", "name"; "empty")]
    #[test_case("..", "name"; "parent directory")]
    #[test_case(".hidden", "name"; "leading dot")]
    #[test_case("svc/1", "name"; "path separator")]
    #[test_case("svc 1", "name"; "whitespace")]
    #[test_case("svc@1", "name"; "unit template character")]
    #[test]
    fn reject_invalid_names(name: &str, field: &str) {
        let definition = WatcherDefinition::new(name, "svc1d", "https://example/repo.git", "main");
        match definition.validate() {
            Err(ConfigError::Invalid { field: result, .. }) => pretty_assertions::assert_eq!(result, field),
            other => panic!("expected invalid {field}, got {other:?}"),
        }
    }

    #[test]
    fn reject_bad_timing() {
        let mut definition = WatcherDefinition::new("svc1", "svc1d", "https://example/repo.git", "main");
        definition.poll_interval_secs = 0;
        assert!(matches!(
            definition.validate(),
            Err(ConfigError::Invalid { field: "poll_interval_secs", .. })
        ));

        let mut definition = WatcherDefinition::new("svc1", "svc1d", "https://example/repo.git", "main");
        definition.retry.max_attempts = 0;
        assert!(matches!(
            definition.validate(),
            Err(ConfigError::Invalid { field: "retry.max_attempts", .. })
        ));

        let mut definition = WatcherDefinition::new("svc1", "svc1d", "https://example/repo.git", "main");
        definition.retry.max_backoff_ms = 1;
        assert!(matches!(
            definition.validate(),
            Err(ConfigError::Invalid { field: "retry.max_backoff_ms", .. })
        ));
    }

    #[test]
    fn derive_paths_from_name() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let roots = roots_in(tmp.path());
        let definition = WatcherDefinition::new("svc1", "svc1d", "https://example/repo.git", "main");
        let config = WatcherConfig::new(definition, &roots)?;

        let install = tmp.path().join("installation/svc1");
        assert_eq!(config.installation_path(), install);
        assert_eq!(config.venv_path(), install.join("venv"));
        assert_eq!(config.bin_path(), install.join("venv/bin"));
        assert_eq!(config.pip_exec(), install.join("venv/bin/pip"));
        assert_eq!(config.service_exec(), install.join("venv/bin/svc1d"));
        assert_eq!(config.deployed_path(), install.join("deployed"));
        assert_eq!(config.git_path(), tmp.path().join("git/svc1"));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));

        assert!(config.installation_path().is_dir());
        assert!(roots.git().is_dir());
        assert!(!config.git_path().exists());

        Ok(())
    }

    #[test]
    fn construction_is_idempotent() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let roots = roots_in(tmp.path());
        let definition = WatcherDefinition::new("svc1", "svc1d", "https://example/repo.git", "main");

        let first = WatcherConfig::new(definition.clone(), &roots)?;
        let second = WatcherConfig::new(definition, &roots)?;
        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn load_from_file() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let roots = roots_in(tmp.path());
        let path = tmp.path().join("config.json");
        let definition = WatcherDefinition::new("svc1", "svc1d", "https://example/repo.git", "main");
        std::fs::write(&path, definition.to_string())?;

        let config = WatcherConfig::load(&path, &roots)?;
        assert_eq!(config.definition(), &definition);

        let missing = WatcherConfig::load(tmp.path().join("nope.json"), &roots);
        assert!(matches!(missing, Err(ConfigError::ReadFile { .. })));

        Ok(())
    }
}
