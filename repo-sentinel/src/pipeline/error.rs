//! Update pipeline error types.

use std::fmt;
use thiserror::Error;

/// A step of the update pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Pulling the latest code into the working copy.
    Sync,
    /// Refreshing dependencies in the repository's environment.
    Dependencies,
    /// Restarting the repository's service.
    Restart,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "sync",
            Self::Dependencies => "dependencies",
            Self::Restart => "restart",
        })
    }
}

/// Errors that stop an update pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stage's command could not be started.
    #[error("{stage} stage could not start `{command}`: {source}")]
    SpawnFailed {
        stage: Stage,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The stage's command exited unsuccessfully.
    #[error("{stage} stage `{command}` failed with exit code {exit_code:?}: {stderr}")]
    CommandFailed {
        stage: Stage,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl PipelineError {
    /// The stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::SpawnFailed { stage, .. } | Self::CommandFailed { stage, .. } => *stage,
        }
    }
}
