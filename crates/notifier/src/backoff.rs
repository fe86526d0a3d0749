//! Linear retry backoff.
//!
//! The delay starts at `initial`, grows by `step` after every consecutive failed
//! attempt and never exceeds `max`. Any successful delivery resets it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before the first retry (5 seconds).
const DEFAULT_INITIAL_SECS: u64 = 5;
/// Default increment per consecutive failure (5 seconds).
const DEFAULT_STEP_SECS: u64 = 5;
/// Default upper bound (5 minutes).
const DEFAULT_MAX_SECS: u64 = 300;

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub step: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_secs(DEFAULT_INITIAL_SECS, DEFAULT_STEP_SECS, DEFAULT_MAX_SECS)
    }
}

impl BackoffPolicy {
    pub fn from_secs(initial: u64, step: u64, max: u64) -> Self {
        Self {
            initial: Duration::from_secs(initial),
            step: Duration::from_secs(step),
            max: Duration::from_secs(max),
        }
    }

    /// Wait imposed after `failures` consecutive failed attempts.
    ///
    /// The first failure waits `initial`, the k-th waits
    /// `min(initial + (k - 1) * step, max)`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let steps = failures.saturating_sub(1);
        self.initial
            .saturating_add(self.step.saturating_mul(steps))
            .min(self.max)
    }
}

/// Backoff state owned by the delivery worker.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial.min(policy.max),
            consecutive_failures: 0,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failure: return the delay to sleep now and grow the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.current = self
            .current
            .saturating_add(self.policy.step)
            .min(self.policy.max);
        delay
    }

    /// Record a success.
    pub fn reset(&mut self) {
        self.current = self.policy.initial.min(self.policy.max);
        self.consecutive_failures = 0;
    }
}
