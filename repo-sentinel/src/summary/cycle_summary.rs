//! Cycle summary types.

use super::result::RepoOutcome;
use std::time::Duration;

/// Summary of one discovery-and-poll cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    /// Number of repositories discovered.
    pub repositories_discovered: usize,

    /// Number of checkouts skipped during discovery.
    pub discovery_errors: usize,

    /// Set when the monitoring root could not be walked at all.
    pub discovery_failed: bool,

    /// Number of repositories that reported no change.
    pub unchanged: usize,

    /// Number of repositories with events that did not trigger an update.
    pub observed: usize,

    /// Number of repositories updated (or, in a dry run, that would have been).
    pub updated: usize,

    /// Number of update pipelines that failed.
    pub update_failures: usize,

    /// Number of repositories whose poll failed.
    pub poll_failures: usize,

    /// Number of repositories skipped.
    pub skipped: usize,

    /// Whether this was a dry run.
    pub dry_run: bool,

    /// Longest pause asked for by a repository (poll interval or backoff).
    pub requested_delay: Duration,
}

impl CycleSummary {
    /// Creates a new empty summary.
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    /// Updates the summary with a repository outcome.
    pub fn record_result(&mut self, result: &RepoOutcome) {
        match result {
            RepoOutcome::Unchanged { .. } => self.unchanged += 1,
            RepoOutcome::Observed { .. } => self.observed += 1,
            RepoOutcome::Updated { .. } | RepoOutcome::WouldUpdate { .. } => self.updated += 1,
            RepoOutcome::UpdateFailed { .. } => self.update_failures += 1,
            RepoOutcome::PollFailed { .. } => self.poll_failures += 1,
            RepoOutcome::Skipped { .. } => self.skipped += 1,
        }
    }

    /// Returns true if any failures occurred.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.discovery_failed || self.update_failures > 0 || self.poll_failures > 0
    }

    /// Returns true if all operations were successful.
    #[must_use]
    pub fn all_success(&self) -> bool {
        !self.has_failures()
    }
}
