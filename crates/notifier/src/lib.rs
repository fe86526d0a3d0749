//! Ordered delivery of rendered notifications to chat rooms.
//!
//! Producers hand messages to a shared [`DeliveryQueue`]; a single
//! [`DeliveryWorker`] drains it in sequence order and calls a [`Deliverer`]
//! (normally the [`MatrixClient`]) with linear backoff between failed attempts.

pub mod backoff;
pub mod error;
pub mod matrix;
pub mod queue;
pub mod transport;
pub mod worker;

pub use backoff::{Backoff, BackoffPolicy};
pub use error::{DeliveryError, FailureClass};
pub use matrix::{MatrixClient, MatrixConfig};
pub use queue::{DeliveryQueue, QueueEntry};
pub use transport::Deliverer;
pub use worker::{AttemptOutcome, DeliveryWorker, WorkerState, WorkerStats, WorkerStatsSnapshot};
