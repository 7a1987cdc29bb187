#![allow(dead_code)]

use futures::future::BoxFuture;
use searchtrail::{Batch, ClickEventFields, SearchEventFields, SinkError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};
use tower::Service;

pub const SEARCH_ID: &str = "5f0c6b9e-8a43-4c7e-9d51-2b8f3a7e6c10";

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn search(search_id: &str, terms: &str, results: i64) -> SearchEventFields {
    SearchEventFields {
        service_name: "catalog".into(),
        search_id: search_id.into(),
        index_name: "products".into(),
        query_terms: terms.into(),
        result_count: results,
        scoring_profile: None,
    }
}

pub fn click(search_id: &str, doc_id: &str, position: i64) -> ClickEventFields {
    ClickEventFields {
        service_name: "catalog".into(),
        search_id: search_id.into(),
        doc_id: doc_id.into(),
        position,
    }
}

/// Sink that plays back a script of outcomes, then succeeds. Records successful batches only.
#[derive(Clone, Default)]
pub struct ScriptedSink {
    script: Arc<Mutex<VecDeque<Result<(), SinkError>>>>,
    delivered: Arc<Mutex<Vec<Batch>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_with(errors: impl IntoIterator<Item = SinkError>) -> Self {
        let sink = Self::new();
        sink.script.lock().unwrap().extend(errors.into_iter().map(Err));
        sink
    }

    pub fn always(error: SinkError) -> Self {
        Self::failing_with(std::iter::repeat(error).take(1_000))
    }

    pub fn delivered(&self) -> Vec<Batch> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_events(&self) -> Batch {
        self.delivered().into_iter().flatten().collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Service<Batch> for ScriptedSink {
    type Response = ();
    type Error = SinkError;
    type Future = BoxFuture<'static, Result<(), SinkError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), SinkError>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Batch) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.delivered.lock().unwrap().push(batch);
        }
        Box::pin(async move { outcome })
    }
}
