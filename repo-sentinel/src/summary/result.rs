//! Per-repository outcome types.

use crate::pipeline::Stage;
use crate::repository::RepoKey;

/// What happened to a single repository during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoOutcome {
    /// The cache validator matched; nothing new.
    Unchanged {
        /// Repository key.
        repository: RepoKey,
    },

    /// Events arrived but none of them asked for an update.
    Observed {
        /// Repository key.
        repository: RepoKey,
        /// Number of events received.
        events: usize,
    },

    /// The update pipeline completed.
    Updated {
        /// Repository key.
        repository: RepoKey,
        /// Event that triggered the update.
        event_id: String,
        /// Service that was restarted.
        service: String,
    },

    /// Dry run: an update would have run.
    WouldUpdate {
        /// Repository key.
        repository: RepoKey,
        /// Event that would have triggered the update.
        event_id: String,
    },

    /// The update pipeline stopped at a failing stage.
    UpdateFailed {
        /// Repository key.
        repository: RepoKey,
        /// Stage that failed.
        stage: Stage,
        /// Error message.
        error: String,
    },

    /// Polling failed.
    PollFailed {
        /// Repository key.
        repository: RepoKey,
        /// Error message.
        error: String,
    },

    /// The repository was not processed.
    Skipped {
        /// Repository key.
        repository: RepoKey,
        /// Reason for skipping.
        reason: String,
    },
}

impl RepoOutcome {
    /// Key of the repository this outcome belongs to.
    pub fn repository(&self) -> &RepoKey {
        match self {
            Self::Unchanged { repository }
            | Self::Observed { repository, .. }
            | Self::Updated { repository, .. }
            | Self::WouldUpdate { repository, .. }
            | Self::UpdateFailed { repository, .. }
            | Self::PollFailed { repository, .. }
            | Self::Skipped { repository, .. } => repository,
        }
    }
}
