//! The event-sink contract and the in-crate sinks.
//!
//! A sink is a `tower::Service<Batch>` that answers `Ok(())` once the batch has been handed off,
//! or a classified `SinkError`. Any service with that shape is an `EventSink`, so sinks compose
//! with ordinary tower combinators.
//!
//! ```rust
//! use searchtrail::{Batch, SinkError};
//! use std::future::Future;
//! use std::pin::Pin;
//! use std::task::{Context, Poll};
//! use tower::Service;
//!
//! #[derive(Clone)]
//! struct StdoutSink;
//!
//! impl Service<Batch> for StdoutSink {
//!     type Response = ();
//!     type Error = SinkError;
//!     type Future = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send>>;
//!
//!     fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), SinkError>> {
//!         Poll::Ready(Ok(()))
//!     }
//!
//!     fn call(&mut self, batch: Batch) -> Self::Future {
//!         for event in &batch {
//!             println!("{}", event);
//!         }
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

use crate::error::SinkError;
use crate::event::{event_to_json, Batch};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower_service::Service;

/// Anything that can receive batches of validated events.
pub trait EventSink: Service<Batch, Response = (), Error = SinkError> + Send + 'static {}

impl<T> EventSink for T where T: Service<Batch, Response = (), Error = SinkError> + Send + 'static {}

/// Records every delivered batch in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Batch>>>,
    calls: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered batches, in delivery order.
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// All delivered events, flattened in delivery order.
    pub fn events(&self) -> Batch {
        self.batches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .flat_map(|b| b.iter().cloned())
            .collect()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Service<Batch> for MemorySink {
    type Response = ();
    type Error = SinkError;
    type Future = BoxFuture<'static, Result<(), SinkError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Batch) -> Self::Future {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).push(batch);
        Box::pin(async { Ok(()) })
    }
}

/// Emits each event as a JSON `tracing` record. Never fails.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<Batch> for LogSink {
    type Response = ();
    type Error = SinkError;
    type Future = BoxFuture<'static, Result<(), SinkError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Batch) -> Self::Future {
        for event in &batch {
            tracing::info!(kind = %event.kind(), event = %event_to_json(event), "search_event");
        }
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SearchEventFields;
    use crate::validate::EventSchemaValidator;
    use tower::ServiceExt;

    fn batch(n: usize) -> Batch {
        let v = EventSchemaValidator::new();
        (0..n)
            .map(|i| {
                v.validate(
                    SearchEventFields {
                        service_name: "svc".into(),
                        search_id: uuid::Uuid::from_u128(i as u128).to_string(),
                        index_name: "idx".into(),
                        query_terms: format!("q{i}"),
                        result_count: i as i64,
                        scoring_profile: None,
                    }
                    .into(),
                )
                .unwrap()
            })
            .collect()
    }

    fn assert_event_sink<S: EventSink>(_: &S) {}

    #[tokio::test]
    async fn memory_sink_records_batches_in_order() {
        let sink = MemorySink::new();
        assert_event_sink(&sink);
        let first = batch(2);
        let second = batch(1);
        sink.clone().oneshot(first.clone()).await.unwrap();
        sink.clone().oneshot(second.clone()).await.unwrap();

        assert_eq!(sink.calls(), 2);
        assert_eq!(sink.batches(), vec![first.clone(), second.clone()]);
        let mut flat = first;
        flat.extend(second);
        assert_eq!(sink.events(), flat);
    }

    #[tokio::test]
    async fn log_sink_accepts_everything() {
        assert_event_sink(&LogSink);
        LogSink.oneshot(batch(3)).await.unwrap();
    }
}
