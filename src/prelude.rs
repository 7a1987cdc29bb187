//! Convenient re-exports for common searchtrail types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    buffer::{EventBuffer, OverflowPolicy},
    client::TelemetryClient,
    config::TelemetryConfig,
    correlation::{CorrelationId, CorrelationIdProvider},
    diagnostics::{DiagnosticEvent, DiagnosticSink, LogDiagnostics, MemoryDiagnostics},
    dispatcher::DeliveryReport,
    error::{SinkError, TelemetryError, TimeoutError, ValidationError},
    event::{Batch, ClickEventFields, SearchEventFields, ValidatedEvent},
    jitter::Jitter,
    sink::{EventSink, MemorySink},
};
