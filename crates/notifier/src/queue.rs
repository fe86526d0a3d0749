//! In-memory delivery queue: a sequence-ordered buffer of outbound messages.
//!
//! Producers call [`DeliveryQueue::enqueue`] from any task or thread; it never
//! waits on the consumer. The single delivery worker calls
//! [`DeliveryQueue::dequeue`], which suspends until an entry is present and
//! always yields the smallest sequence number.
//!
//! The queue lives only in memory. Entries pending at process exit are lost.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use herald_common::types::RoomId;

/// First sequence number handed out by a new queue.
const FIRST_SEQUENCE: u64 = 1;

/// One pending message.
///
/// Ordering and equality consider `sequence` only.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Position assigned at enqueue time; kept across requeues.
    pub sequence: u64,
    pub destination: RoomId,
    /// Fully rendered message text.
    pub body: String,
    /// Failed attempts so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence.cmp(&other.sequence)
    }
}

#[derive(Debug)]
struct QueueState {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    next_sequence: u64,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<QueueState>,
    available: Notify,
}

/// Shared handle to the delivery queue. Cloning is cheap and every clone
/// refers to the same queue.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    heap: BinaryHeap::new(),
                    next_sequence: FIRST_SEQUENCE,
                }),
                available: Notify::new(),
            }),
        }
    }

    /// Add a message and return its sequence number.
    ///
    /// The sequence is assigned under the same lock as the insertion, so the
    /// order in which concurrent `enqueue` calls return is the delivery order.
    pub fn enqueue(&self, destination: RoomId, body: impl Into<String>) -> u64 {
        let sequence = {
            let mut state = self.inner.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.heap.push(Reverse(QueueEntry {
                sequence,
                destination,
                body: body.into(),
                attempts: 0,
                enqueued_at: Utc::now(),
            }));
            sequence
        };

        self.inner.available.notify_one();
        sequence
    }

    /// Wait for an entry and remove the one with the smallest sequence.
    ///
    /// Intended for a single consumer. A notification that arrives while no
    /// consumer is waiting is stored as a permit, so a wake-up is never lost.
    pub async fn dequeue(&self) -> QueueEntry {
        loop {
            if let Some(entry) = self.try_dequeue() {
                return entry;
            }
            self.inner.available.notified().await;
        }
    }

    /// Remove the smallest-sequence entry if one is present.
    pub fn try_dequeue(&self) -> Option<QueueEntry> {
        self.inner.state.lock().heap.pop().map(|Reverse(entry)| entry)
    }

    /// Put a previously dequeued entry back, keeping its sequence number.
    pub fn requeue(&self, entry: QueueEntry) {
        tracing::trace!(sequence = entry.sequence, "Requeued entry");
        self.inner.state.lock().heap.push(Reverse(entry));
        self.inner.available.notify_one();
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number the next `enqueue` will assign.
    pub fn next_sequence(&self) -> u64 {
        self.inner.state.lock().next_sequence
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}
