//! `TelemetryClient`: the facade producers talk to.
//!
//! Logging is synchronous and needs no runtime: validate, check correlation, enqueue. Delivery
//! happens on the dispatcher's background task (`start`) or on demand (`flush`).
//!
//! ```rust
//! use searchtrail::{MemorySink, SearchEventFields, TelemetryClient, TelemetryConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = MemorySink::new();
//! let client = TelemetryClient::new(TelemetryConfig::default(), sink.clone()).unwrap();
//!
//! let id = client.obtain_correlation_id(None);
//! client
//!     .log_search_event(SearchEventFields {
//!         service_name: "catalog".into(),
//!         search_id: id.to_string(),
//!         index_name: "products".into(),
//!         query_terms: "red shoes".into(),
//!         result_count: 12,
//!         scoring_profile: None,
//!     })
//!     .unwrap();
//!
//! let report = client.flush(Duration::from_secs(1)).await.unwrap();
//! assert_eq!(report.delivered, 1);
//! assert_eq!(sink.events().len(), 1);
//! # }
//! ```

use crate::buffer::EventBuffer;
use crate::config::TelemetryConfig;
use crate::correlation::{CorrelationId, CorrelationIdProvider, RecentSearches};
use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink, LogDiagnostics};
use crate::dispatcher::{DeliveryDispatcher, DeliveryReport, DispatcherHandle};
use crate::error::{ConfigError, OrphanClickWarning, TelemetryError, TimeoutError, ValidationError};
use crate::event::{ClickEventFields, EventKind, SearchEventFields, ValidatedEvent};
use crate::sink::EventSink;
use crate::time::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::validate::EventSchemaValidator;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Composition root for search telemetry. Construct once and pass it around; cheap to share
/// behind an `Arc`.
pub struct TelemetryClient<S> {
    config: TelemetryConfig,
    correlation: CorrelationIdProvider,
    validator: EventSchemaValidator,
    buffer: Arc<EventBuffer>,
    recent: Mutex<RecentSearches>,
    dispatcher: Arc<DeliveryDispatcher<S>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    background: Mutex<Option<DispatcherHandle>>,
}

impl<S> std::fmt::Debug for TelemetryClient<S>
where
    S: EventSink,
    S::Future: Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("config", &self.config)
            .field("buffered", &self.buffer.len())
            .field("in_flight", &self.dispatcher.in_flight())
            .finish_non_exhaustive()
    }
}

impl<S> TelemetryClient<S>
where
    S: EventSink,
    S::Future: Send,
{
    /// Client with the system clock, tokio sleeper and `tracing` diagnostics.
    pub fn new(config: TelemetryConfig, sink: S) -> Result<Self, ConfigError> {
        Self::builder(config, sink).build()
    }

    pub fn builder(config: TelemetryConfig, sink: S) -> ClientBuilder<S> {
        ClientBuilder {
            config,
            sink,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            diagnostics: Arc::new(LogDiagnostics),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Correlation id for a new search request. See `CorrelationIdProvider::obtain`.
    pub fn obtain_correlation_id(&self, header: Option<&str>) -> CorrelationId {
        self.correlation.obtain(header)
    }

    /// Validate and buffer a search event.
    pub fn log_search_event(&self, fields: SearchEventFields) -> Result<(), TelemetryError> {
        let event = self
            .validator
            .validate_search(fields)
            .map_err(|e| self.invalid(EventKind::Search, e))?;
        let search_id = event.search_id();
        self.enqueue(ValidatedEvent::Search(event))?;
        self.recent.lock().unwrap_or_else(|p| p.into_inner()).record(search_id);
        Ok(())
    }

    /// Validate and buffer a click event. A click on an unknown search is flagged, not refused.
    pub fn log_click_event(&self, fields: ClickEventFields) -> Result<(), TelemetryError> {
        let event = self
            .validator
            .validate_click(fields)
            .map_err(|e| self.invalid(EventKind::Click, e))?;
        let known =
            self.recent.lock().unwrap_or_else(|p| p.into_inner()).contains(&event.search_id());
        if !known {
            let warning = OrphanClickWarning {
                search_id: event.search_id(),
                doc_id: event.doc_id().to_owned(),
            };
            tracing::info!(search_id = %warning.search_id, doc_id = %warning.doc_id, "orphan click");
            self.diagnostics.emit(DiagnosticEvent::OrphanClick(warning));
        }
        self.enqueue(ValidatedEvent::Click(event))
    }

    fn invalid(&self, kind: EventKind, error: ValidationError) -> TelemetryError {
        tracing::warn!(%kind, field = error.field, %error, "dropping invalid event");
        self.diagnostics.emit(DiagnosticEvent::ValidationRejected { kind, error: error.clone() });
        error.into()
    }

    fn enqueue(&self, event: ValidatedEvent) -> Result<(), TelemetryError> {
        match self.buffer.push(event) {
            Ok(0) => Ok(()),
            Ok(count) => {
                let total = self.buffer.evicted();
                tracing::debug!(count, total, "buffer full, evicted oldest");
                self.diagnostics.emit(DiagnosticEvent::Evicted { count, total });
                Ok(())
            }
            Err(full) => {
                tracing::warn!(capacity = full.capacity, "buffer full, event rejected");
                self.diagnostics.emit(DiagnosticEvent::Rejected { capacity: full.capacity });
                Err(full.into())
            }
        }
    }

    /// Deliver everything buffered within `timeout`.
    pub async fn flush(&self, timeout: Duration) -> Result<DeliveryReport, TimeoutError> {
        self.dispatcher.flush(timeout).await
    }

    /// Spawn the periodic delivery loop. No-op if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut background = self.background.lock().unwrap_or_else(|p| p.into_inner());
        if background.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *background = Some(self.dispatcher.spawn());
        tracing::debug!(interval = ?self.config.flush_interval, "delivery loop started");
    }

    /// Stop the delivery loop, then flush with the configured `flushTimeout`.
    pub async fn shutdown(&self) -> Result<DeliveryReport, TimeoutError> {
        let handle = self.background.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.flush(self.config.flush_timeout).await
    }

    /// Events waiting for delivery, including a batch held for retry.
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.dispatcher.in_flight()
    }

    /// Retained dead letters, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dispatcher.dead_letters().entries()
    }

    pub fn dead_letter_queue(&self) -> &Arc<DeadLetterQueue> {
        self.dispatcher.dead_letters()
    }

    /// Move every retained dead letter back to the head of the buffer, oldest first, with a
    /// fresh retry budget. Returns the number of events re-queued.
    ///
    /// For use once the sink has been fixed; the buffer may exceed capacity until drained.
    pub fn replay_dead_letters(&self) -> usize {
        let events: Vec<ValidatedEvent> =
            self.dispatcher.dead_letters().take().into_iter().flat_map(|l| l.events).collect();
        let count = events.len();
        if count > 0 {
            tracing::info!(events = count, "replaying dead letters");
            self.buffer.requeue_front(events);
        }
        count
    }
}

/// Builder for `TelemetryClient` with injectable time and diagnostics.
pub struct ClientBuilder<S> {
    config: TelemetryConfig,
    sink: S,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl<S> ClientBuilder<S>
where
    S: EventSink,
    S::Future: Send,
{
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_sleeper<T: Sleeper + 'static>(mut self, sleeper: T) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn build(self) -> Result<TelemetryClient<S>, ConfigError> {
        let config = self.config;
        config.validate()?;
        let buffer =
            Arc::new(EventBuffer::with_policy(config.buffer_capacity, config.overflow_policy));
        let dead_letters = Arc::new(DeadLetterQueue::new(
            config.dead_letter_capacity,
            config.dead_letter_alert_threshold,
        ));
        let dispatcher = DeliveryDispatcher::builder(buffer.clone(), self.sink)
            .batch_size(config.batch_size)
            .max_retries(config.max_retries)
            .backoff(config.backoff())
            .with_jitter(config.jitter())
            .shared_sleeper(self.sleeper)
            .interval(config.flush_interval)
            .dead_letters(dead_letters)
            .diagnostics(self.diagnostics.clone())
            .clock(self.clock.clone())
            .build()?;
        Ok(TelemetryClient {
            correlation: CorrelationIdProvider::new(),
            validator: EventSchemaValidator::with_shared_clock(self.clock),
            recent: Mutex::new(RecentSearches::new(config.orphan_window)),
            buffer,
            dispatcher: Arc::new(dispatcher),
            diagnostics: self.diagnostics,
            background: Mutex::new(None),
            config,
        })
    }
}
