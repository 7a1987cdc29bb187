//! Error types for event validation, buffering, delivery and flushing.
//!
//! Every failure on a producer's call path is returned as a typed value; nothing here panics.
//! `OrphanClickWarning` is not an error at all: it is surfaced through diagnostics only.
use crate::dispatcher::DeliveryReport;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Why a single field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    /// A required string was empty or whitespace-only.
    Empty,
    /// An integer that must be `>= 0` was negative.
    Negative(i64),
    /// The value is not a well-formed UUID.
    MalformedUuid,
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationReason::Empty => write!(f, "must not be empty"),
            ValidationReason::Negative(n) => write!(f, "must be >= 0 (got {})", n),
            ValidationReason::MalformedUuid => write!(f, "is not a well-formed UUID"),
        }
    }
}

/// A malformed event. Local and non-fatal: the event is dropped, never enqueued.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid field `{field}`: {reason}")]
pub struct ValidationError {
    /// Wire name of the offending field (e.g. `searchId`).
    pub field: &'static str,
    pub reason: ValidationReason,
}

impl ValidationError {
    pub(crate) fn new(field: &'static str, reason: ValidationReason) -> Self {
        Self { field, reason }
    }
}

/// Returned by `enqueue` when the buffer runs in reject mode and is at capacity.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("event buffer full (capacity {capacity})")]
pub struct BufferFullError {
    pub capacity: usize,
}

/// Failure reported by an event sink.
///
/// The classification decides what the dispatcher does with the batch: transient failures hold
/// the batch and retry it with backoff, permanent ones go straight to the dead-letter queue.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Network timeout, 5xx-equivalent, temporarily unavailable.
    #[error("transient sink failure: {0}")]
    Transient(String),
    /// Malformed payload, auth failure, anything retrying cannot fix.
    #[error("permanent sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn transient(msg: impl Into<String>) -> Self {
        SinkError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        SinkError::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// `flush` did not finish within its deadline.
///
/// Carries what was achieved before the deadline; undelivered events are back in the buffer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("flush timed out after {elapsed:?} (limit: {timeout:?}); {remaining} events still buffered", remaining = .report.remaining)]
pub struct TimeoutError {
    pub elapsed: Duration,
    pub timeout: Duration,
    pub report: DeliveryReport,
}

/// Errors surfaced by the `TelemetryClient` logging calls.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    BufferFull(#[from] BufferFullError),
}

impl TelemetryError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_buffer_full(&self) -> bool {
        matches!(self, Self::BufferFull(_))
    }

    /// The offending field, if this is a validation failure.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation(e) => Some(e.field),
            Self::BufferFull(_) => None,
        }
    }
}

/// A click whose `searchId` has no matching search in recent local history.
///
/// Informational only; the click is still delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanClickWarning {
    pub search_id: Uuid,
    pub doc_id: String,
}

impl fmt::Display for OrphanClickWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "click on `{}` references unknown search {}", self.doc_id, self.search_id)
    }
}

/// Invalid `TelemetryConfig`.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be > 0")]
    Zero { field: &'static str },
    #[error("retryMaxDelay ({max:?}) must be >= retryBaseDelay ({base:?})")]
    MaxDelayBelowBase { base: Duration, max: Duration },
    #[error("jitterRatio must be in [0, 1) (got {0})")]
    JitterRatio(f64),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}
