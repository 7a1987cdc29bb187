//! Record of batches the sink would not take.
//!
//! Bounded: keeps the most recent `capacity` entries while counting every dead-lettered batch.
//! When the running total first reaches the alert threshold the queue reports it once, so the
//! caller can escalate to a process-level diagnostic instead of logging on every failure.

use crate::error::SinkError;
use crate::event::Batch;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1_000;
pub const DEFAULT_ALERT_THRESHOLD: u64 = 100;

/// One undeliverable batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub events: Batch,
    /// The error that ended delivery.
    pub error: SinkError,
    /// Sends attempted, including the first.
    pub attempts: usize,
    pub at: SystemTime,
}

#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    total_batches: AtomicU64,
    total_events: AtomicU64,
    alert_threshold: u64,
    alerted: AtomicBool,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_LETTER_CAPACITY, DEFAULT_ALERT_THRESHOLD)
    }
}

impl DeadLetterQueue {
    pub fn new(capacity: usize, alert_threshold: u64) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            total_batches: AtomicU64::new(0),
            total_events: AtomicU64::new(0),
            alert_threshold: alert_threshold.max(1),
            alerted: AtomicBool::new(false),
        }
    }

    /// Store `letter`. Returns the running batch total if this push crossed the alert threshold
    /// for the first time.
    pub fn push(&self, letter: DeadLetter) -> Option<u64> {
        self.total_events.fetch_add(letter.events.len() as u64, Ordering::Relaxed);
        let total = self.total_batches.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(letter);
        }
        if total >= self.alert_threshold && !self.alerted.swap(true, Ordering::Relaxed) {
            return Some(total);
        }
        None
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }

    /// Remove and return the retained entries, e.g. to replay them elsewhere.
    pub fn take(&self) -> Vec<DeadLetter> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches dead-lettered since creation, including ones no longer retained.
    pub fn total_batches(&self) -> u64 {
        self.total_batches.load(Ordering::Relaxed)
    }

    pub fn total_events(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    pub fn alert_threshold(&self) -> u64 {
        self.alert_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(attempts: usize) -> DeadLetter {
        DeadLetter {
            events: Vec::new(),
            error: SinkError::permanent("rejected"),
            attempts,
            at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn keeps_most_recent_entries() {
        let dlq = DeadLetterQueue::new(2, 100);
        for i in 1..=3 {
            dlq.push(letter(i));
        }
        let attempts: Vec<_> = dlq.entries().iter().map(|l| l.attempts).collect();
        assert_eq!(attempts, vec![2, 3]);
        assert_eq!(dlq.total_batches(), 3);
    }

    #[test]
    fn alerts_once_at_threshold() {
        let dlq = DeadLetterQueue::new(10, 3);
        assert_eq!(dlq.push(letter(1)), None);
        assert_eq!(dlq.push(letter(1)), None);
        assert_eq!(dlq.push(letter(1)), Some(3));
        assert_eq!(dlq.push(letter(1)), None);
        assert_eq!(dlq.alert_threshold(), 3);
    }

    #[test]
    fn take_empties_retained_but_not_totals() {
        let dlq = DeadLetterQueue::default();
        dlq.push(letter(1));
        assert_eq!(dlq.take().len(), 1);
        assert!(dlq.is_empty());
        assert_eq!(dlq.total_batches(), 1);
    }
}
