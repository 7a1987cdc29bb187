//! Diagnostics for the telemetry core itself.
//!
//! The client and dispatcher report what they do (validation drops, evictions, orphan clicks,
//! retries, dead letters) as `DiagnosticEvent`s through a `DiagnosticSink`. The default sink logs
//! via `tracing`; tests use `MemoryDiagnostics`; `BroadcastDiagnostics` feeds live subscribers.

pub mod events;
pub mod sinks;

pub use events::DiagnosticEvent;
pub use sinks::{
    BroadcastDiagnostics, DiagnosticSink, LogDiagnostics, MemoryDiagnostics, NullDiagnostics,
};
