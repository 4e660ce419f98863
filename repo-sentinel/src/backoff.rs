//! Exponential backoff with jitter for failed polls.
//!
//! A failure doubles the current delay and adds up to 10% jitter, capped at
//! `max_delay`. Once more than `max_retries` consecutive failures have
//! accumulated the controller gives up on growing the delay and starts over
//! at `base_delay`; polling itself never stops.

use std::time::Duration;
use tracing::warn;

/// Fraction of the pre-jitter delay used as the jitter range.
const JITTER_FRACTION: f64 = 0.1;

/// Tunables for [`BackoffController`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffSettings {
    /// Delay after a reset.
    pub base_delay: Duration,
    /// Upper bound for any computed delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the posture is reset.
    pub max_retries: u32,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

/// What to do after a failed poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDelay {
    /// Consecutive failures counted so far (0 after a reset).
    pub attempt: u32,
    /// How long to sleep before polling again.
    pub delay: Duration,
    /// Set when `max_retries` was exceeded and the state was reset.
    pub exhausted: bool,
}

/// Retry count and delay of one polling loop.
#[derive(Debug)]
pub struct BackoffController {
    settings: BackoffSettings,
    retry_count: u32,
    delay: Duration,
    rng: fastrand::Rng,
}

impl BackoffController {
    /// Creates a controller in its reset state.
    pub fn new(settings: BackoffSettings) -> Self {
        Self::with_rng(settings, fastrand::Rng::new())
    }

    /// Creates a controller with a seeded jitter source.
    pub fn with_seed(settings: BackoffSettings, seed: u64) -> Self {
        Self::with_rng(settings, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(settings: BackoffSettings, rng: fastrand::Rng) -> Self {
        let delay = settings.base_delay;
        Self {
            settings,
            retry_count: 0,
            delay,
            rng,
        }
    }

    /// Consecutive failures counted so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Current delay.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// The configured tunables.
    pub fn settings(&self) -> &BackoffSettings {
        &self.settings
    }

    /// Records a successful poll.
    pub fn on_success(&mut self) {
        self.reset();
    }

    /// Records a poll that reported no change.
    ///
    /// Same effect as [`Self::on_success`]; the caller paces itself with its
    /// regular poll interval rather than `base_delay`.
    pub fn on_no_change(&mut self) {
        self.reset();
    }

    /// Records a failed poll and returns the delay to sleep.
    pub fn on_failure(&mut self) -> RetryDelay {
        self.retry_count += 1;

        if self.retry_count > self.settings.max_retries {
            warn!(
                max_retries = self.settings.max_retries,
                "Failed after maximum retries, resetting backoff"
            );
            self.reset();
            return RetryDelay {
                attempt: self.retry_count,
                delay: self.delay,
                exhausted: true,
            };
        }

        let current = self.delay.as_secs_f64();
        let jitter = self.rng.f64() * JITTER_FRACTION * current;
        let next = (current * 2.0 + jitter).min(self.settings.max_delay.as_secs_f64());
        self.delay = Duration::from_secs_f64(next.max(0.0));

        RetryDelay {
            attempt: self.retry_count,
            delay: self.delay,
            exhausted: false,
        }
    }

    fn reset(&mut self) {
        self.retry_count = 0;
        self.delay = self.settings.base_delay;
    }
}
