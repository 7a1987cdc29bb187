//! Bounded FIFO of validated events awaiting delivery.
//!
//! Semantics:
//! - `enqueue` appends at the tail. At capacity, `OverflowPolicy::DropOldest` (default) evicts
//!   from the head to admit the new event; `OverflowPolicy::Reject` refuses it with
//!   `BufferFullError`.
//! - `drain(max)` removes up to `max` events from the head, oldest first.
//! - `requeue_front` puts undelivered events back at the head in their original order (dead-letter
//!   replay). It never evicts, so the buffer can temporarily exceed capacity; subsequent enqueues
//!   apply the overflow policy until the length is back under capacity.
//!
//! All three run under one mutex, so concurrent producers never observe a partial drain and
//! never lose entries except through the overflow policy.

use crate::error::BufferFullError;
use crate::event::ValidatedEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// What `enqueue` does when the buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered event. Recent activity is worth more than stale entries.
    #[default]
    DropOldest,
    /// Refuse the new event.
    Reject,
}

/// Default capacity when none is configured.
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug)]
pub struct EventBuffer {
    queue: Mutex<VecDeque<ValidatedEvent>>,
    capacity: usize,
    policy: OverflowPolicy,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBuffer {
    /// Drop-oldest buffer holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::DropOldest)
    }

    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    // A panicking holder cannot leave the deque half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<ValidatedEvent>> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append `event`, applying the overflow policy. Returns how many events were evicted.
    pub fn push(&self, event: ValidatedEvent) -> Result<usize, BufferFullError> {
        let mut queue = self.lock();
        let mut evicted = 0;
        if queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Reject => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(BufferFullError { capacity: self.capacity });
                }
                OverflowPolicy::DropOldest => {
                    while queue.len() >= self.capacity {
                        queue.pop_front();
                        evicted += 1;
                    }
                    self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
                }
            }
        }
        queue.push_back(event);
        Ok(evicted)
    }

    /// Append `event`, applying the overflow policy.
    pub fn enqueue(&self, event: ValidatedEvent) -> Result<(), BufferFullError> {
        self.push(event).map(|_| ())
    }

    /// Remove and return up to `max` of the oldest events, in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<ValidatedEvent> {
        let mut queue = self.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Put `batch` back at the head, preserving its order.
    pub fn requeue_front(&self, batch: Vec<ValidatedEvent>) {
        if batch.is_empty() {
            return;
        }
        let mut queue = self.lock();
        for event in batch.into_iter().rev() {
            queue.push_front(event);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Events evicted by the drop-oldest policy since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Events refused by the reject policy since creation.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<ValidatedEvent> {
        self.lock().iter().cloned().collect()
    }
}
