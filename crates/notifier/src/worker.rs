//! Delivery worker, the single consumer of the [`DeliveryQueue`].
//!
//! The worker loops through three states:
//!
//! - `Idle`: waiting for the queue to yield the smallest-sequence entry
//! - `Delivering`: one attempt in flight through the [`Deliverer`]
//! - `Backoff`: sleeping after a retryable failure, the entry already requeued
//!
//! Only one attempt is ever in flight, which keeps messages in sequence order
//! and bounds outbound load to a single request regardless of producer bursts.
//! Client rejections (4xx) are dropped; every other failure is retried forever
//! with linear backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::FailureClass;
use crate::queue::{DeliveryQueue, QueueEntry};
use crate::transport::Deliverer;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Delivering,
    Backoff,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Delivering,
            2 => WorkerState::Backoff,
            _ => WorkerState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Delivering => 1,
            WorkerState::Backoff => 2,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Delivering => write!(f, "delivering"),
            WorkerState::Backoff => write!(f, "backoff"),
        }
    }
}

/// Counters shared between the worker and observers (e.g. the health endpoint).
#[derive(Debug, Default)]
pub struct WorkerStats {
    state: AtomicU8,
    delivered: AtomicU64,
    rejected: AtomicU64,
    failed_attempts: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub state: WorkerState,
    pub delivered: u64,
    pub rejected: u64,
    pub failed_attempts: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            state: WorkerState::from_u8(self.state.load(Ordering::Relaxed)),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Delivered; the entry is gone and the backoff reset.
    Delivered,
    /// Rejected by the remote side; the entry is gone, backoff untouched.
    Rejected,
    /// Failed; the entry is back in the queue and the worker must wait `delay`.
    Retry { delay: Duration },
}

/// Background task draining the delivery queue.
pub struct DeliveryWorker<D> {
    queue: DeliveryQueue,
    deliverer: D,
    backoff: Backoff,
    stats: Arc<WorkerStats>,
    cancel: CancellationToken,
}

impl<D: Deliverer> DeliveryWorker<D> {
    pub fn new(
        queue: DeliveryQueue,
        deliverer: D,
        policy: BackoffPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            deliverer,
            backoff: Backoff::new(policy),
            stats: Arc::new(WorkerStats::default()),
            cancel,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Launch the worker on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain the queue until the cancellation token fires.
    ///
    /// Cancellation is observed while idle and while backing off. An attempt
    /// that is already in flight is allowed to finish so its entry is either
    /// delivered or requeued, never lost mid-way.
    pub async fn run(mut self) {
        let policy = *self.backoff.policy();
        tracing::info!(
            initial_secs = policy.initial.as_secs_f64(),
            step_secs = policy.step.as_secs_f64(),
            max_secs = policy.max.as_secs_f64(),
            "Delivery worker started"
        );

        loop {
            self.stats.set_state(WorkerState::Idle);
            let entry = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                entry = self.queue.dequeue() => entry,
            };

            if let AttemptOutcome::Retry { delay } = self.attempt(entry).await {
                self.stats.set_state(WorkerState::Backoff);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.stats.set_state(WorkerState::Idle);
        tracing::info!(pending = self.queue.len(), "Delivery worker stopped");
    }

    /// Perform one attempt for `entry` and apply the retry policy.
    ///
    /// On a retryable failure the entry is requeued before returning; sleeping
    /// for the returned delay is left to the caller.
    pub async fn attempt(&mut self, mut entry: QueueEntry) -> AttemptOutcome {
        self.stats.set_state(WorkerState::Delivering);
        tracing::debug!(
            sequence = entry.sequence,
            room_id = %entry.destination,
            attempt = entry.attempts + 1,
            "Delivering message"
        );

        let error = match self.deliverer.deliver(&entry.destination, &entry.body).await {
            Ok(()) => {
                self.backoff.reset();
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    sequence = entry.sequence,
                    room_id = %entry.destination,
                    "Message delivered"
                );
                return AttemptOutcome::Delivered;
            }
            Err(error) => error,
        };

        let class = error.classify();
        if class == FailureClass::ClientRejected {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                sequence = entry.sequence,
                room_id = %entry.destination,
                error = %error,
                "Homeserver rejected message, dropping it"
            );
            return AttemptOutcome::Rejected;
        }

        entry.attempts += 1;
        let delay = self.backoff.next_delay();
        self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);

        if class == FailureClass::Unexpected {
            tracing::warn!(
                sequence = entry.sequence,
                room_id = %entry.destination,
                attempts = entry.attempts,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Unexpected delivery failure, will retry"
            );
        } else {
            tracing::debug!(
                sequence = entry.sequence,
                room_id = %entry.destination,
                attempts = entry.attempts,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Delivery failed, will retry"
            );
        }

        self.queue.requeue(entry);
        AttemptOutcome::Retry { delay }
    }
}
