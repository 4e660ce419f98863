//! Update pipeline run after a qualifying push.
//!
//! The pipeline:
//! 1. Pulls the latest code into the working copy
//! 2. Refreshes dependencies in the repository's own environment, if it has a
//!    dependency manifest
//! 3. Restarts the service named after the working copy's directory
//!
//! Each step only runs if the previous one succeeded. Completed steps are not
//! rolled back when a later one fails.

mod command;
mod error;

pub use command::{CommandOutcome, CommandRunner, CommandSpec, TokioCommandRunner};
pub use error::{PipelineError, Stage};

use crate::repository::MonitoredRepository;
use std::path::PathBuf;
use tracing::{info, info_span, Instrument};

/// Settings for [`UpdatePipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Dependency manifest looked up in the working copy.
    pub dependency_manifest: String,
    /// Installation root of the repository's environment, relative to the working copy.
    pub environment_dir: PathBuf,
    /// Restart program and leading arguments; the service name is appended.
    pub restart_command: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            dependency_manifest: "requirements.txt".to_string(),
            environment_dir: PathBuf::from(".venv"),
            restart_command: vec!["systemctl".to_string(), "restart".to_string()],
        }
    }
}

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Stages that ran, in order.
    pub stages: Vec<Stage>,
    /// Service that was restarted.
    pub service: String,
}

/// Runs the pull / dependency refresh / restart sequence for a repository.
#[derive(Debug, Clone)]
pub struct UpdatePipeline<C> {
    runner: C,
    settings: PipelineSettings,
}

impl<C: CommandRunner> UpdatePipeline<C> {
    /// Creates a pipeline that runs commands through `runner`.
    pub fn new(runner: C, settings: PipelineSettings) -> Self {
        Self { runner, settings }
    }

    /// Returns the command runner.
    pub fn runner(&self) -> &C {
        &self.runner
    }

    /// Service name for a repository: its working copy's directory name.
    pub fn service_name(repository: &MonitoredRepository) -> String {
        repository.directory_name().to_string()
    }

    /// Runs the pipeline for `repository`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] tagged with the first stage that failed.
    pub async fn apply(
        &self,
        repository: &MonitoredRepository,
    ) -> Result<PipelineReport, PipelineError> {
        let span = info_span!("update", repo = %repository.key);

        async {
            let mut stages = Vec::with_capacity(3);

            self.run_stage(Stage::Sync, self.sync_command(repository))
                .await?;
            stages.push(Stage::Sync);

            if let Some(command) = self.dependency_command(repository) {
                self.run_stage(Stage::Dependencies, command).await?;
                stages.push(Stage::Dependencies);
            } else {
                info!(
                    manifest = %self.settings.dependency_manifest,
                    "No dependency manifest, skipping refresh"
                );
            }

            let service = Self::service_name(repository);
            self.run_stage(Stage::Restart, self.restart_command(repository, &service))
                .await?;
            stages.push(Stage::Restart);

            info!(service = %service, "Update complete");
            Ok(PipelineReport { stages, service })
        }
        .instrument(span)
        .await
    }

    fn sync_command(&self, repository: &MonitoredRepository) -> CommandSpec {
        CommandSpec::new("git", ["pull"], &repository.path)
    }

    fn dependency_command(&self, repository: &MonitoredRepository) -> Option<CommandSpec> {
        let manifest = repository.path.join(&self.settings.dependency_manifest);
        if !manifest.is_file() {
            return None;
        }

        let installer = repository
            .path
            .join(&self.settings.environment_dir)
            .join("bin")
            .join("pip");
        Some(CommandSpec::new(
            installer,
            ["install", "-r", self.settings.dependency_manifest.as_str()],
            &repository.path,
        ))
    }

    fn restart_command(&self, repository: &MonitoredRepository, service: &str) -> CommandSpec {
        let (program, leading) = match self.settings.restart_command.split_first() {
            Some((program, leading)) => (program.as_str(), leading),
            None => ("systemctl", &[][..]),
        };
        let args = leading
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(service));
        CommandSpec::new(program, args, &repository.path)
    }

    async fn run_stage(&self, stage: Stage, command: CommandSpec) -> Result<(), PipelineError> {
        info!(stage = %stage, command = %command, "Running stage");

        let outcome =
            self.runner
                .run(&command)
                .await
                .map_err(|source| PipelineError::SpawnFailed {
                    stage,
                    command: command.to_string(),
                    source,
                })?;

        if !outcome.succeeded() {
            return Err(PipelineError::CommandFailed {
                stage,
                command: command.to_string(),
                exit_code: outcome.exit_code,
                stderr: outcome.stderr,
            });
        }

        Ok(())
    }
}
