#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # searchtrail
//!
//! Search-interaction telemetry core: correlate a search request with the clicks that follow
//! it, validate both event shapes, and deliver them to an external sink at least once.
//!
//! ## Pieces
//!
//! - **Correlation**: obtain the backend's search id or synthesize a v4 UUID
//! - **Validation**: search and click schemas, first bad field reported
//! - **Buffering**: bounded FIFO with drop-oldest or reject on overflow
//! - **Delivery**: batched `tower::Service` sinks, exponential backoff with jitter on transient
//!   failures, dead-letter queue for permanent ones
//! - **Diagnostics**: typed operational events plus `tracing` logs
//!
//! ## Quick Start
//!
//! ```rust
//! use searchtrail::{
//!     ClickEventFields, MemorySink, SearchEventFields, TelemetryClient, TelemetryConfig,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = MemorySink::new();
//!     let client = TelemetryClient::new(TelemetryConfig::default(), sink.clone()).unwrap();
//!     client.start();
//!
//!     // Header from the search backend response, if any.
//!     let search_id = client.obtain_correlation_id(None).to_string();
//!
//!     client
//!         .log_search_event(SearchEventFields {
//!             service_name: "catalog".into(),
//!             search_id: search_id.clone(),
//!             index_name: "products".into(),
//!             query_terms: String::new(),
//!             result_count: 0,
//!             scoring_profile: None,
//!         })
//!         .unwrap();
//!     client
//!         .log_click_event(ClickEventFields {
//!             service_name: "catalog".into(),
//!             search_id,
//!             doc_id: "sku-42".into(),
//!             position: 0,
//!         })
//!         .unwrap();
//!
//!     let report = client.shutdown().await.unwrap();
//!     assert_eq!(report.remaining, 0);
//!     assert_eq!(sink.events().len(), 2);
//! }
//! ```

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod config;
pub mod correlation;
pub mod dead_letter;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod jitter;
pub mod prelude;
pub mod sink;
pub mod time;
pub mod validate;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use buffer::{EventBuffer, OverflowPolicy};
pub use client::{ClientBuilder, TelemetryClient};
pub use config::TelemetryConfig;
pub use correlation::{CorrelationId, CorrelationIdProvider, CorrelationSource, RecentSearches};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use diagnostics::{DiagnosticEvent, DiagnosticSink};
pub use dispatcher::{Cycle, DeliveryDispatcher, DeliveryReport, DispatcherBuilder, DispatcherHandle};
pub use error::{
    BufferFullError, ConfigError, OrphanClickWarning, SinkError, TelemetryError, TimeoutError,
    ValidationError, ValidationReason,
};
pub use event::{
    event_to_json, Batch, ClickEvent, ClickEventFields, EventKind, RawEvent, SearchEvent,
    SearchEventFields, ValidatedEvent,
};
pub use jitter::Jitter;
pub use sink::{EventSink, LogSink, MemorySink};
pub use time::{Clock, Sleeper};
pub use validate::EventSchemaValidator;
