use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::core::types::Candidate;

/// Bounded FIFO buffer between the log subscription and the dispatcher.
///
/// Backpressure is shedding, not blocking: once the queue is at capacity
/// further candidates are dropped at the tail, so admitted entries keep
/// strict arrival order and the subscription callback never stalls.
#[derive(Debug)]
pub struct IngestQueue {
    inner: Mutex<VecDeque<Candidate>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl IngestQueue {
    /// Creates a queue with the given capacity. The dispatcher drains at
    /// most `max_rate` per second, so callers size this as `2 * max_rate`.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends a candidate at the tail. Returns `false` when the queue is
    /// full and the candidate was shed.
    pub fn enqueue(&self, candidate: Candidate) -> bool {
        let mut queue = self.inner.lock().expect("ingest queue poisoned");
        if queue.len() >= self.capacity {
            drop(queue);
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                signature = %candidate.signature,
                dropped_total = total,
                "Ingest queue full, shedding candidate"
            );
            return false;
        }
        queue.push_back(candidate);
        true
    }

    /// Removes and returns the head candidate, or `None` when empty.
    pub fn dequeue_one(&self) -> Option<Candidate> {
        self.inner.lock().expect("ingest queue poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ingest queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidates shed at the tail since startup.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
