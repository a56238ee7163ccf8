// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use jacques::{
    path::{Roots, DEFAULT_GIT_ROOT, DEFAULT_INSTALLATION_ROOT},
    Watcher, WatcherConfig,
};

use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keep a Python service deployed at the head of a git branch.
#[derive(Debug, Clone, Parser)]
#[command(about, override_usage = "jacques-deploy [options]", version)]
struct Cli {
    /// Path to watcher definition file.
    #[arg(short, long, value_name = "path", default_value = "config.json")]
    pub config: PathBuf,

    /// Root directory holding isolated runtimes of watched services.
    #[arg(long, value_name = "path", default_value = DEFAULT_INSTALLATION_ROOT)]
    pub installation_root: String,

    /// Root directory holding git clones of watched services.
    #[arg(long, value_name = "path", default_value = DEFAULT_GIT_ROOT)]
    pub git_root: String,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let roots = Roots::new(
            shellexpand::full(&self.installation_root)?.into_owned(),
            shellexpand::full(&self.git_root)?.into_owned(),
        );
        roots.ensure()?;

        let config = WatcherConfig::load(&self.config, &roots)
            .with_context(|| format!("cannot load {:?}", self.config.display()))?;
        info!("starting watcher for {}", config.name());

        Watcher::new(config).run(shutdown_signal()).await?;

        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

/// Resolve on the first interrupt or termination request.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(err), _) | (_, Err(err)) => {
                    warn!("cannot install signal handlers, falling back to ctrl-c: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        warn!("ctrl-c received");
    }
}
