use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff policy shared by live feed reconnection & notification retries.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound of any single delay, before jitter.
    pub max: Duration,
    /// Multiplier applied to the delay after every failed attempt.
    pub factor: u32,
    /// Consecutive failed attempts tolerated before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Add up to a fifth of the delay as random jitter.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2,
            max_attempts: None,
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay following the zero-indexed failed `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(attempt);
        self.initial.saturating_mul(multiplier).min(self.max)
    }

    /// Delay following the zero-indexed failed `attempt`, or `None` once the attempt limit
    /// is exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }

        let delay = self.base_delay(attempt);
        if !self.jitter {
            return Some(delay);
        }

        let jitter_ms = (delay.as_millis() / 5) as u64;
        let jitter = rand::rng().random_range(0..=jitter_ms);
        Some(delay + Duration::from_millis(jitter))
    }

    /// Stateful attempt counter over this policy.
    pub fn start(&self) -> BackoffState {
        BackoffState {
            policy: *self,
            attempt: 0,
        }
    }
}

/// Running count of consecutive failures under a [`Backoff`] policy.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: Backoff,
    attempt: u32,
}

impl BackoffState {
    /// Register a failure, returning how long to wait before retrying, or `None` if the
    /// policy's attempt limit is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.delay(self.attempt)?;
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Register a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
