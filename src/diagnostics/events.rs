use crate::error::{OrphanClickWarning, ValidationError};
use crate::event::EventKind;
use std::fmt;
use std::time::Duration;

/// Operational signals emitted by the client and the dispatcher.
///
/// These describe what the telemetry core itself did (drops, retries, dead letters). They are
/// never sent to the event sink.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// An event failed schema validation and was dropped.
    ValidationRejected { kind: EventKind, error: ValidationError },
    /// The buffer evicted its oldest events to admit a new one.
    Evicted { count: usize, total: u64 },
    /// The buffer refused an event (reject policy).
    Rejected { capacity: usize },
    /// A click referenced a search id not seen recently.
    OrphanClick(OrphanClickWarning),
    /// A batch reached the sink.
    BatchDelivered { events: usize, attempts: usize },
    /// A batch failed transiently and was re-queued.
    RetryScheduled { attempt: usize, delay: Duration, events: usize },
    /// A batch failed permanently or ran out of retries.
    DeadLettered { events: usize, attempts: usize, reason: String },
    /// Dead-lettered batches reached the alert threshold.
    DeadLetterThresholdExceeded { total: u64, threshold: u64 },
    /// `flush` hit its deadline with events still buffered.
    FlushTimedOut { timeout: Duration, remaining: usize },
}

impl DiagnosticEvent {
    /// Stable snake_case name, for log fields and counters.
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticEvent::ValidationRejected { .. } => "validation_rejected",
            DiagnosticEvent::Evicted { .. } => "evicted",
            DiagnosticEvent::Rejected { .. } => "rejected",
            DiagnosticEvent::OrphanClick(_) => "orphan_click",
            DiagnosticEvent::BatchDelivered { .. } => "batch_delivered",
            DiagnosticEvent::RetryScheduled { .. } => "retry_scheduled",
            DiagnosticEvent::DeadLettered { .. } => "dead_lettered",
            DiagnosticEvent::DeadLetterThresholdExceeded { .. } => "dead_letter_threshold_exceeded",
            DiagnosticEvent::FlushTimedOut { .. } => "flush_timed_out",
        }
    }
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::ValidationRejected { kind, error } => {
                write!(f, "ValidationRejected({kind}: {error})")
            }
            DiagnosticEvent::Evicted { count, total } => {
                write!(f, "Evicted(count={count}, total={total})")
            }
            DiagnosticEvent::Rejected { capacity } => write!(f, "Rejected(capacity={capacity})"),
            DiagnosticEvent::OrphanClick(w) => write!(f, "OrphanClick({w})"),
            DiagnosticEvent::BatchDelivered { events, attempts } => {
                write!(f, "BatchDelivered(events={events}, attempts={attempts})")
            }
            DiagnosticEvent::RetryScheduled { attempt, delay, events } => {
                write!(f, "RetryScheduled(#{attempt}, delay={delay:?}, events={events})")
            }
            DiagnosticEvent::DeadLettered { events, attempts, reason } => {
                write!(f, "DeadLettered(events={events}, attempts={attempts}, reason={reason})")
            }
            DiagnosticEvent::DeadLetterThresholdExceeded { total, threshold } => {
                write!(f, "DeadLetterThresholdExceeded({total}/{threshold})")
            }
            DiagnosticEvent::FlushTimedOut { timeout, remaining } => {
                write!(f, "FlushTimedOut(timeout={timeout:?}, remaining={remaining})")
            }
        }
    }
}
