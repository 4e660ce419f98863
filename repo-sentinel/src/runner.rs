//! Wires the production collaborators into a [`Scheduler`].

use crate::config::{AgentConfig, ConfigError};
use crate::discovery::WalkdirWalker;
use crate::http::OctocrabClient;
use crate::pipeline::TokioCommandRunner;
use crate::scheduler::Scheduler;
use crate::summary::CycleSummary;
use tokio::sync::watch;
use tracing::info;

/// Errors that can occur while starting the agent.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Configuration loading and validation errors.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// GitHub API client initialization errors.
    #[error(transparent)]
    Octocrab(#[from] octocrab::Error),
}

/// Scheduler backed by the GitHub API, local processes and the filesystem.
pub type LiveScheduler = Scheduler<OctocrabClient, TokioCommandRunner, WalkdirWalker>;

/// Runs the monitoring agent against real repositories.
pub struct Runner {
    scheduler: LiveScheduler,
}

impl Runner {
    /// Builds a runner from a resolved configuration.
    ///
    /// Sending `true` on `shutdown` stops the runner between repositories.
    pub fn new(config: AgentConfig, shutdown: watch::Receiver<bool>) -> Result<Self, RunnerError> {
        let client = OctocrabClient::new()?;
        info!(
            root = %config.root().display(),
            api = %config.api_base_url(),
            concurrency = config.concurrency(),
            "Initialized runner"
        );

        Ok(Self {
            scheduler: Scheduler::new(config, client, TokioCommandRunner, WalkdirWalker, shutdown),
        })
    }

    /// Returns the underlying scheduler.
    pub fn scheduler(&self) -> &LiveScheduler {
        &self.scheduler
    }

    /// Monitors repositories until shutdown is requested.
    pub async fn run(&self) {
        self.scheduler.run().await;
    }

    /// Runs a single cycle and returns its summary.
    pub async fn run_once(&self) -> CycleSummary {
        self.scheduler.run_cycle().await
    }
}
