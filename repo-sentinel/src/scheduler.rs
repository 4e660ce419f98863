//! The monitoring loop.
//!
//! Each cycle re-discovers the checked-out repositories, polls every one of
//! them, runs the update pipeline for the first qualifying event of a
//! repository, then sleeps until the next cycle. Failures are contained to the
//! repository they belong to; the loop only stops when shutdown is requested.
//!
//! The sleep between cycles is the only pause. Each repository reports how
//! long it would like to wait (poll interval, base delay or backoff delay) and
//! the loop sleeps for the longest of those or the cycle interval.

use crate::backoff::BackoffController;
use crate::config::AgentConfig;
use crate::discovery::{discover, DirectoryWalker, Discovery, DiscoveryError};
use crate::events::{first_trigger, Event};
use crate::http::HttpClient;
use crate::pipeline::{CommandRunner, UpdatePipeline};
use crate::poller::{EventPoller, PollResult};
use crate::registry::RepoRegistry;
use crate::repository::{MonitoredRepository, RepoKey};
use crate::summary::{CycleSummary, RepoOutcome};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Drives discovery, polling and updates until shutdown.
pub struct Scheduler<H, C, W> {
    config: AgentConfig,
    registry: RepoRegistry,
    poller: EventPoller<H>,
    pipeline: UpdatePipeline<C>,
    walker: Arc<W>,
    backoff: Mutex<BackoffController>,
    in_flight: Mutex<HashSet<RepoKey>>,
    shutdown: watch::Receiver<bool>,
}

impl<H, C, W> Scheduler<H, C, W>
where
    H: HttpClient,
    C: CommandRunner,
    W: DirectoryWalker + 'static,
{
    /// Creates a scheduler. Sending `true` on the `shutdown` channel stops it.
    pub fn new(
        config: AgentConfig,
        client: H,
        runner: C,
        walker: W,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let poller = EventPoller::new(
            client,
            Some(config.credential().clone()),
            config.api_base_url().clone(),
            config.request_timeout(),
        );
        let pipeline = UpdatePipeline::new(runner, config.pipeline().clone());
        let backoff = BackoffController::new(config.backoff().clone());

        Self {
            config,
            registry: RepoRegistry::new(),
            poller,
            pipeline,
            walker: Arc::new(walker),
            backoff: Mutex::new(backoff),
            in_flight: Mutex::default(),
            shutdown,
        }
    }

    /// Replaces the backoff controller.
    pub fn with_backoff(mut self, backoff: BackoffController) -> Self {
        self.backoff = Mutex::new(backoff);
        self
    }

    /// Returns the repository registry.
    pub fn registry(&self) -> &RepoRegistry {
        &self.registry
    }

    /// Returns the event poller.
    pub fn poller(&self) -> &EventPoller<H> {
        &self.poller
    }

    /// Returns the update pipeline.
    pub fn pipeline(&self) -> &UpdatePipeline<C> {
        &self.pipeline
    }

    /// Consecutive poll failures currently counted by the backoff.
    pub fn retry_count(&self) -> u32 {
        lock(&self.backoff).retry_count()
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Runs cycles until shutdown is requested.
    pub async fn run(&self) {
        info!(
            root = %self.config.root().display(),
            interval_secs = self.config.cycle_interval().as_secs(),
            dry_run = self.config.dry_run(),
            "Starting monitoring loop"
        );

        while !self.is_shutting_down() {
            let summary = self.run_cycle().await;
            let delay = self.config.cycle_interval().max(summary.requested_delay);
            if !self.pause(delay).await {
                break;
            }
        }

        info!("Monitoring loop stopped");
    }

    /// Runs a single discovery-and-poll cycle without sleeping.
    ///
    /// The pause the repositories asked for is reported in
    /// [`CycleSummary::requested_delay`].
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::new(self.config.dry_run());

        let report = match self.walk_root().await {
            Ok(discovery) => self
                .registry
                .apply(discovery, self.config.preserve_token_across_discovery()),
            Err(e) => {
                error!(error = %e, "Discovery failed, skipping cycle");
                summary.discovery_failed = true;
                return summary;
            }
        };
        summary.repositories_discovered = report.discovered;
        summary.discovery_errors = report.errors.len();

        let outcomes: Vec<(RepoOutcome, Duration)> = stream::iter(self.registry.keys())
            .map(|key| self.process_repository(key))
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        for (outcome, pace) in &outcomes {
            summary.record_result(outcome);
            summary.requested_delay = summary.requested_delay.max(*pace);
        }

        info!(
            discovered = summary.repositories_discovered,
            unchanged = summary.unchanged,
            updated = summary.updated,
            update_failures = summary.update_failures,
            poll_failures = summary.poll_failures,
            requested_delay_secs = summary.requested_delay.as_secs_f64(),
            "Cycle complete"
        );
        summary
    }

    /// Walks the monitoring root on the blocking pool.
    async fn walk_root(&self) -> Result<Discovery, DiscoveryError> {
        let walker = Arc::clone(&self.walker);
        let root = self.config.root().to_path_buf();
        let marker = self.config.vcs_marker().to_string();

        tokio::task::spawn_blocking(move || discover(walker.as_ref(), &root, &marker))
            .await
            .map_err(|source| DiscoveryError::WalkAborted { source })?
    }

    /// Polls one repository and acts on its events.
    ///
    /// Returns the outcome and the pause the repository asks for.
    async fn process_repository(&self, key: RepoKey) -> (RepoOutcome, Duration) {
        if self.is_shutting_down() {
            let outcome = RepoOutcome::Skipped {
                repository: key,
                reason: "shutting down".to_string(),
            };
            return (outcome, Duration::ZERO);
        }

        let span = info_span!("poll", repo = %key);

        async {
            let repository = match self.registry.get(&key) {
                Ok(repository) => repository,
                Err(e) => {
                    warn!(error = %e, "Repository vanished before polling");
                    let outcome = RepoOutcome::Skipped {
                        repository: key,
                        reason: e.to_string(),
                    };
                    return (outcome, Duration::ZERO);
                }
            };

            info!("Polling events");
            let result = match self.poller.check(&self.registry, &repository).await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "Poll not attempted");
                    let outcome = RepoOutcome::PollFailed {
                        repository: key,
                        error: e.to_string(),
                    };
                    return (outcome, Duration::ZERO);
                }
            };

            match result {
                PollResult::NoChange => {
                    lock(&self.backoff).on_no_change();
                    debug!("No new events");
                    (
                        RepoOutcome::Unchanged { repository: key },
                        self.config.poll_interval(),
                    )
                }
                PollResult::Events(events) => {
                    lock(&self.backoff).on_success();
                    for event in &events {
                        info!(event_type = %event.kind, event_id = %event.id, "New event");
                    }
                    (
                        self.handle_events(&repository, &events).await,
                        self.config.backoff().base_delay,
                    )
                }
                PollResult::Failure(failure) => {
                    let retry = lock(&self.backoff).on_failure();
                    warn!(
                        error = %failure,
                        attempt = retry.attempt,
                        delay_secs = retry.delay.as_secs_f64(),
                        "Poll failed, backing off"
                    );
                    (
                        RepoOutcome::PollFailed {
                            repository: key,
                            error: failure.to_string(),
                        },
                        retry.delay,
                    )
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_events(&self, repository: &MonitoredRepository, events: &[Event]) -> RepoOutcome {
        let key = repository.key.clone();

        let Some(trigger) = first_trigger(events, repository.last_seen_event.as_deref()) else {
            debug!(count = events.len(), "No update-triggering events");
            return RepoOutcome::Observed {
                repository: key,
                events: events.len(),
            };
        };

        if self.config.dry_run() {
            info!(
                event_type = %trigger.kind,
                event_id = %trigger.id,
                service = %UpdatePipeline::<C>::service_name(repository),
                "Dry run: would update"
            );
            return RepoOutcome::WouldUpdate {
                repository: key,
                event_id: trigger.id.clone(),
            };
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &key) else {
            warn!("Update already in progress, skipping");
            return RepoOutcome::Skipped {
                repository: key,
                reason: "update already in progress".to_string(),
            };
        };

        info!(event_type = %trigger.kind, event_id = %trigger.id, "Triggering update");
        match self.pipeline.apply(repository).await {
            Ok(report) => {
                if let Err(e) = self.registry.mark_seen(&key, trigger.id.as_str()) {
                    warn!(error = %e, "Failed to record processed event");
                }
                RepoOutcome::Updated {
                    repository: key,
                    event_id: trigger.id.clone(),
                    service: report.service,
                }
            }
            Err(e) => {
                error!(stage = %e.stage(), error = %e, "Update failed");
                RepoOutcome::UpdateFailed {
                    repository: key,
                    stage: e.stage(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    ///
    /// Returns false if shutdown was requested.
    async fn pause(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow_and_update() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            Ok(_) = shutdown.wait_for(|stop| *stop) => false,
        }
    }
}

/// Marks a repository as being updated for as long as it is held.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<RepoKey>>,
    key: RepoKey,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<RepoKey>>, key: &RepoKey) -> Option<Self> {
        let inserted = lock(set).insert(key.clone());
        inserted.then(|| Self {
            set,
            key: key.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
