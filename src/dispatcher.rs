//! Background delivery of buffered events to an `EventSink`.
//!
//! Semantics:
//! - One delivery cycle drains up to `batch_size` events and sends them in one sink call.
//! - `SinkError::Transient`: the batch is held at the front of the delivery queue, ahead of
//!   everything still buffered, and the next cycle resends exactly that batch after
//!   `jitter(backoff.delay(n))`, where `n` is the retry number. Events enqueued meanwhile wait
//!   in the buffer and never join it.
//! - `SinkError::Permanent`, or a transient failure after `max_retries` retries: the batch is
//!   moved to the dead-letter queue and never retried.
//! - A cycle interrupted mid-send (flush deadline, shutdown) keeps its batch held with the
//!   same attempt count. Delivery is at-least-once: a sink that accepted a batch just before
//!   the interruption will see it again.
//!
//! Invariants:
//! - At most one cycle runs at a time; the sink and the held batch live behind an async mutex
//!   shared by the background loop and `flush`.
//! - The held batch is outside the buffer, so overflow eviction never touches it.
//! - Sends per batch never exceed `max_retries + 1`.

use crate::backoff::Backoff;
use crate::buffer::EventBuffer;
use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY,
    DEFAULT_RETRY_MAX_DELAY,
};
use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink, LogDiagnostics};
use crate::error::{ConfigError, SinkError, TimeoutError};
use crate::event::Batch;
use crate::jitter::Jitter;
use crate::sink::EventSink;
use crate::time::{Clock, Sleeper, SystemClock, TokioSleeper};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tower::ServiceExt;

/// What a `flush` achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Events accepted by the sink.
    pub delivered: usize,
    /// Successful sink calls.
    pub batches: usize,
    /// Transient failures that led to a retry.
    pub retries: usize,
    /// Events moved to the dead-letter queue.
    pub dead_lettered: usize,
    /// Events not yet delivered when the flush returned, held batch included.
    pub remaining: usize,
}

impl DeliveryReport {
    /// True when nothing was attempted.
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.batches == 0 && self.retries == 0 && self.dead_lettered == 0
    }
}

/// Outcome of one delivery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Nothing held and the buffer was empty; the sink was not called.
    Idle,
    Delivered { events: usize },
    /// Batch held for redelivery; wait `delay` before the next cycle.
    Retrying { attempt: usize, delay: Duration },
    DeadLettered { events: usize },
}

struct DeliveryState<S> {
    sink: S,
    /// Batch held back after a transient failure. It is resent as-is, ahead of the buffer,
    /// until it is delivered or dead-lettered.
    pending: Option<Pending>,
}

struct Pending {
    events: Batch,
    /// Sends attempted so far.
    sends: usize,
}

/// Drains an `EventBuffer` into an `EventSink` with retry, backoff and dead-lettering.
pub struct DeliveryDispatcher<S> {
    buffer: Arc<EventBuffer>,
    state: Mutex<DeliveryState<S>>,
    held: AtomicUsize,
    batch_size: usize,
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
    dead_letters: Arc<DeadLetterQueue>,
    diagnostics: Arc<dyn DiagnosticSink>,
    clock: Arc<dyn Clock>,
}

impl<S> std::fmt::Debug for DeliveryDispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryDispatcher")
            .field("batch_size", &self.batch_size)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("interval", &self.interval)
            .field("buffered", &self.buffer.len())
            .field("in_flight", &self.held.load(Ordering::Relaxed))
            .field("sink", &"<sink>")
            .finish()
    }
}

impl<S> DeliveryDispatcher<S>
where
    S: EventSink,
    S::Future: Send,
{
    pub fn builder(buffer: Arc<EventBuffer>, sink: S) -> DispatcherBuilder<S> {
        DispatcherBuilder::new(buffer, sink)
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Events held for redelivery outside the buffer.
    pub fn in_flight(&self) -> usize {
        self.held.load(Ordering::Relaxed)
    }

    /// Run one delivery cycle: resend the held batch if there is one, otherwise drain a new
    /// batch from the buffer.
    pub async fn deliver_next(&self) -> Cycle {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.pending.is_none() {
            let events = self.buffer.drain(self.batch_size);
            if events.is_empty() {
                return Cycle::Idle;
            }
            self.held.store(events.len(), Ordering::Relaxed);
            state.pending = Some(Pending { events, sends: 0 });
        }
        let Some(pending) = state.pending.as_ref() else {
            return Cycle::Idle;
        };
        let payload = pending.events.clone();
        let count = payload.len();
        let attempt = pending.sends + 1;

        let result = match ServiceExt::<Batch>::ready(&mut state.sink).await {
            Ok(sink) => sink.call(payload).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.release(state);
                tracing::debug!(events = count, attempt, "batch delivered");
                self.diagnostics
                    .emit(DiagnosticEvent::BatchDelivered { events: count, attempts: attempt });
                Cycle::Delivered { events: count }
            }
            Err(err) if err.is_transient() && attempt <= self.max_retries => {
                if let Some(pending) = state.pending.as_mut() {
                    pending.sends = attempt;
                }
                let delay = self.jitter.apply(self.backoff.delay(attempt));
                tracing::warn!(events = count, retry = attempt, ?delay, error = %err, "transient sink failure, batch held for retry");
                self.diagnostics
                    .emit(DiagnosticEvent::RetryScheduled { attempt, delay, events: count });
                Cycle::Retrying { attempt, delay }
            }
            Err(err) => {
                let events = self.release(state);
                self.dead_letter(events, err, attempt);
                Cycle::DeadLettered { events: count }
            }
        }
    }

    fn release(&self, state: &mut DeliveryState<S>) -> Batch {
        self.held.store(0, Ordering::Relaxed);
        state.pending.take().map(|p| p.events).unwrap_or_default()
    }

    fn dead_letter(&self, events: Batch, error: SinkError, attempts: usize) {
        let count = events.len();
        tracing::warn!(events = count, attempts, error = %error, "batch dead-lettered");
        self.diagnostics.emit(DiagnosticEvent::DeadLettered {
            events: count,
            attempts,
            reason: error.to_string(),
        });
        let crossed =
            self.dead_letters.push(DeadLetter { events, error, attempts, at: self.clock.now() });
        if let Some(total) = crossed {
            let threshold = self.dead_letters.alert_threshold();
            tracing::error!(total, threshold, "dead-letter threshold exceeded");
            self.diagnostics.emit(DiagnosticEvent::DeadLetterThresholdExceeded { total, threshold });
        }
    }

    // Deliver until the buffer is empty, sleeping out retry delays.
    async fn drain_into(&self, report: &mut DeliveryReport) {
        loop {
            match self.deliver_next().await {
                Cycle::Idle => return,
                Cycle::Delivered { events } => {
                    report.delivered += events;
                    report.batches += 1;
                }
                Cycle::Retrying { delay, .. } => {
                    report.retries += 1;
                    self.sleeper.sleep(delay).await;
                }
                Cycle::DeadLettered { events } => report.dead_lettered += events,
            }
        }
    }

    /// Deliver everything currently buffered, giving up after `timeout`.
    ///
    /// On timeout the partial report travels inside the error. Undelivered events stay queued,
    /// an interrupted batch stays held, and both count toward `remaining`.
    pub async fn flush(&self, timeout: Duration) -> Result<DeliveryReport, TimeoutError> {
        let start = Instant::now();
        let mut report = DeliveryReport::default();
        let finished = tokio::time::timeout(timeout, self.drain_into(&mut report)).await.is_ok();
        report.remaining = self.buffer.len() + self.in_flight();
        if finished {
            return Ok(report);
        }
        tracing::warn!(?timeout, remaining = report.remaining, "flush timed out");
        self.diagnostics
            .emit(DiagnosticEvent::FlushTimedOut { timeout, remaining: report.remaining });
        Err(TimeoutError { elapsed: start.elapsed(), timeout, report })
    }

    /// Periodic delivery loop. Returns once `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            let mut report = DeliveryReport::default();
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = self.drain_into(&mut report) => {}
            }
            if !report.is_empty() {
                tracing::debug!(
                    delivered = report.delivered,
                    retries = report.retries,
                    dead_lettered = report.dead_lettered,
                    "delivery pass complete"
                );
            }
        }
        tracing::debug!(
            buffered = self.buffer.len(),
            in_flight = self.in_flight(),
            "delivery loop stopped"
        );
    }

    /// Start `run` on the tokio runtime. Dropping the handle also stops the loop.
    pub fn spawn(self: &Arc<Self>) -> DispatcherHandle {
        let (tx, rx) = watch::channel(false);
        let this = Arc::clone(self);
        let join = tokio::spawn(async move { this.run(rx).await });
        DispatcherHandle { shutdown: tx, join }
    }
}

/// Handle to a spawned delivery loop.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Stop the loop and wait for it. An interrupted batch stays held for the next flush.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "delivery loop panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Builder for `DeliveryDispatcher`.
pub struct DispatcherBuilder<S> {
    buffer: Arc<EventBuffer>,
    sink: S,
    batch_size: usize,
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
    dead_letters: Arc<DeadLetterQueue>,
    diagnostics: Arc<dyn DiagnosticSink>,
    clock: Arc<dyn Clock>,
}

impl<S> DispatcherBuilder<S>
where
    S: EventSink,
    S::Future: Send,
{
    pub fn new(buffer: Arc<EventBuffer>, sink: S) -> Self {
        let base = Backoff::exponential(DEFAULT_RETRY_BASE_DELAY);
        Self {
            buffer,
            sink,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: base.with_max(DEFAULT_RETRY_MAX_DELAY).unwrap_or(base),
            jitter: Jitter::default(),
            sleeper: Arc::new(TokioSleeper),
            interval: DEFAULT_FLUSH_INTERVAL,
            dead_letters: Arc::new(DeadLetterQueue::default()),
            diagnostics: Arc::new(LogDiagnostics),
            clock: Arc::new(SystemClock),
        }
    }

    /// Max events per sink call. Must be > 0.
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Retries after the first send before a batch is dead-lettered.
    pub fn max_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<T: Sleeper + 'static>(mut self, sleeper: T) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub(crate) fn shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Period of the background loop. Must be > 0.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn dead_letters(mut self, queue: Arc<DeadLetterQueue>) -> Self {
        self.dead_letters = queue;
        self
    }

    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<DeliveryDispatcher<S>, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Zero { field: "batchSize" });
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Zero { field: "flushInterval" });
        }
        Ok(DeliveryDispatcher {
            buffer: self.buffer,
            state: Mutex::new(DeliveryState { sink: self.sink, pending: None }),
            held: AtomicUsize::new(0),
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
            interval: self.interval,
            dead_letters: self.dead_letters,
            diagnostics: self.diagnostics,
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemoryDiagnostics;
    use crate::event::{ClickEventFields, ValidatedEvent};
    use crate::time::{NoopSleeper, RecordingSleeper};
    use crate::validate::EventSchemaValidator;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tower_service::Service;

    /// Plays back scripted outcomes, then succeeds.
    #[derive(Clone, Default)]
    struct ScriptedSink {
        script: Arc<std::sync::Mutex<VecDeque<Result<(), SinkError>>>>,
        delivered: Arc<std::sync::Mutex<Vec<Batch>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedSink {
        fn failing(outcomes: Vec<SinkError>) -> Self {
            let sink = Self::default();
            sink.script.lock().unwrap().extend(outcomes.into_iter().map(Err));
            sink
        }

        fn delivered(&self) -> Vec<Batch> {
            self.delivered.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
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

    /// Hangs every send until `open` is set, then delegates.
    #[derive(Clone, Default)]
    struct GatedSink {
        open: Arc<std::sync::atomic::AtomicBool>,
        inner: ScriptedSink,
    }

    impl Service<Batch> for GatedSink {
        type Response = ();
        type Error = SinkError;
        type Future = BoxFuture<'static, Result<(), SinkError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), SinkError>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, batch: Batch) -> Self::Future {
            if self.open.load(Ordering::SeqCst) {
                self.inner.call(batch)
            } else {
                Box::pin(futures::future::pending())
            }
        }
    }

    /// Never completes a send.
    #[derive(Clone)]
    struct HangingSink;

    impl Service<Batch> for HangingSink {
        type Response = ();
        type Error = SinkError;
        type Future = BoxFuture<'static, Result<(), SinkError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), SinkError>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _batch: Batch) -> Self::Future {
            Box::pin(futures::future::pending())
        }
    }

    fn click(position: i64) -> ValidatedEvent {
        EventSchemaValidator::new()
            .validate(
                ClickEventFields {
                    service_name: "svc".into(),
                    search_id: "11111111-1111-1111-1111-111111111111".into(),
                    doc_id: format!("doc{position}"),
                    position,
                }
                .into(),
            )
            .unwrap()
    }

    fn filled(n: i64) -> Arc<EventBuffer> {
        let buffer = Arc::new(EventBuffer::new(1_000));
        for i in 0..n {
            buffer.enqueue(click(i)).unwrap();
        }
        buffer
    }

    fn positions(batches: &[Batch]) -> Vec<u64> {
        batches.iter().flatten().filter_map(|e| e.as_click()).map(|c| c.position()).collect()
    }

    #[tokio::test]
    async fn flush_on_empty_buffer_is_a_no_op() {
        let sink = ScriptedSink::default();
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let dispatcher = DeliveryDispatcher::builder(filled(0), sink.clone())
            .diagnostics(diagnostics.clone())
            .build()
            .unwrap();

        let report = dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report, DeliveryReport::default());
        assert!(report.is_empty());
        assert_eq!(sink.calls(), 0);
        assert!(diagnostics.is_empty());

        let again = dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(again, report);
    }

    #[tokio::test]
    async fn flush_delivers_in_batches_and_order() {
        let sink = ScriptedSink::default();
        let dispatcher =
            DeliveryDispatcher::builder(filled(7), sink.clone()).batch_size(3).build().unwrap();

        let report = dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.delivered, 7);
        assert_eq!(report.batches, 3);
        assert_eq!(report.remaining, 0);
        let sizes: Vec<_> = sink.delivered().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(positions(&sink.delivered()), (0..7).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn transient_failures_retry_then_deliver_once() {
        let sink = ScriptedSink::failing(vec![
            SinkError::transient("timeout"),
            SinkError::transient("503"),
        ]);
        let sleeper = RecordingSleeper::new();
        let dispatcher = DeliveryDispatcher::builder(filled(4), sink.clone())
            .batch_size(10)
            .max_retries(5)
            .with_jitter(Jitter::None)
            .with_sleeper(sleeper.clone())
            .build()
            .unwrap();

        let report = dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.retries, 2);
        assert_eq!(report.delivered, 4);
        assert_eq!(sink.calls(), 3);
        assert_eq!(sink.delivered().len(), 1, "only the successful call counts");
        assert_eq!(positions(&sink.delivered()), vec![0, 1, 2, 3]);
        assert_eq!(sleeper.count(), 2);
        assert!(dispatcher.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn retry_delays_follow_capped_exponential_backoff() {
        let sink = ScriptedSink::failing(vec![SinkError::transient("x"); 4]);
        let sleeper = RecordingSleeper::new();
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .with_max(Duration::from_millis(250))
            .unwrap();
        let dispatcher = DeliveryDispatcher::builder(filled(1), sink)
            .backoff(backoff)
            .with_jitter(Jitter::None)
            .with_sleeper(sleeper.clone())
            .build()
            .unwrap();

        dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        let millis: Vec<_> = sleeper.delays().iter().map(|d| d.as_millis()).collect();
        assert_eq!(millis, vec![100, 200, 250, 250]);
    }

    #[tokio::test]
    async fn retry_delays_are_jittered_within_twenty_percent() {
        let sink = ScriptedSink::failing(vec![SinkError::transient("x"); 3]);
        let sleeper = RecordingSleeper::new();
        let dispatcher = DeliveryDispatcher::builder(filled(1), sink)
            .backoff(Backoff::constant(Duration::from_millis(1_000)))
            .with_sleeper(sleeper.clone())
            .build()
            .unwrap();

        dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        for d in sleeper.delays() {
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1_200), "{d:?}");
        }
    }

    #[tokio::test]
    async fn permanent_failure_dead_letters_without_retry() {
        let sink = ScriptedSink::failing(vec![SinkError::permanent("401")]);
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let dispatcher = DeliveryDispatcher::builder(filled(2), sink.clone())
            .with_sleeper(NoopSleeper)
            .diagnostics(diagnostics.clone())
            .build()
            .unwrap();

        let report = dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.dead_lettered, 2);
        assert_eq!(report.retries, 0);
        assert_eq!(sink.calls(), 1);

        let letters = dispatcher.dead_letters().entries();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 1);
        assert_eq!(letters[0].error, SinkError::permanent("401"));
        assert_eq!(letters[0].events.len(), 2);
        assert_eq!(diagnostics.count("dead_lettered"), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_become_permanent() {
        let sink = ScriptedSink::failing(vec![SinkError::transient("down"); 10]);
        let dispatcher = DeliveryDispatcher::builder(filled(1), sink.clone())
            .max_retries(2)
            .with_sleeper(NoopSleeper)
            .build()
            .unwrap();

        let report = dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(sink.calls(), 3);
        assert_eq!(report.retries, 2);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(dispatcher.dead_letters().entries()[0].attempts, 3);
        assert!(dispatcher.buffer().is_empty());
    }

    #[tokio::test]
    async fn zero_max_retries_dead_letters_first_transient_failure() {
        let sink = ScriptedSink::failing(vec![SinkError::transient("down")]);
        let dispatcher = DeliveryDispatcher::builder(filled(1), sink.clone())
            .max_retries(0)
            .with_sleeper(NoopSleeper)
            .build()
            .unwrap();

        let report = dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(sink.calls(), 1);
        assert_eq!(report.dead_lettered, 1);
    }

    #[tokio::test]
    async fn dead_letter_threshold_escalates_once() {
        let sink = ScriptedSink::failing(vec![SinkError::permanent("bad"); 3]);
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let dispatcher = DeliveryDispatcher::builder(filled(3), sink)
            .batch_size(1)
            .dead_letters(Arc::new(DeadLetterQueue::new(10, 2)))
            .diagnostics(diagnostics.clone())
            .build()
            .unwrap();

        dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(dispatcher.dead_letters().total_batches(), 3);
        assert_eq!(diagnostics.count("dead_letter_threshold_exceeded"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_timeout_keeps_interrupted_batch_held() {
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let dispatcher = DeliveryDispatcher::builder(filled(5), HangingSink)
            .batch_size(2)
            .diagnostics(diagnostics.clone())
            .build()
            .unwrap();

        let err = dispatcher.flush(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.timeout, Duration::from_millis(50));
        assert_eq!(err.report.delivered, 0);
        assert_eq!(err.report.remaining, 5);
        assert_eq!(dispatcher.in_flight(), 2);
        assert_eq!(dispatcher.buffer().len(), 3);
        let order: Vec<u64> = dispatcher
            .buffer()
            .snapshot()
            .iter()
            .filter_map(|e| e.as_click())
            .map(|c| c.position())
            .collect();
        assert_eq!(order, vec![2, 3, 4]);
        assert_eq!(diagnostics.count("flush_timed_out"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_batch_is_resent_first() {
        let sink = GatedSink::default();
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let dispatcher = DeliveryDispatcher::builder(filled(3), sink.clone())
            .batch_size(2)
            .diagnostics(diagnostics.clone())
            .build()
            .unwrap();

        dispatcher.flush(Duration::from_millis(50)).await.unwrap_err();
        sink.open.store(true, Ordering::SeqCst);
        let report = dispatcher.flush(Duration::from_secs(1)).await.unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(dispatcher.in_flight(), 0);
        let sizes: Vec<_> = sink.inner.delivered().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(positions(&sink.inner.delivered()), vec![0, 1, 2]);
        assert_eq!(
            diagnostics.events().into_iter().find(|e| e.name() == "batch_delivered"),
            Some(DiagnosticEvent::BatchDelivered { events: 2, attempts: 1 })
        );
    }

    #[tokio::test]
    async fn events_enqueued_during_backoff_do_not_join_the_retried_batch() {
        let buffer = filled(1);
        let sink = ScriptedSink::failing(vec![SinkError::transient("down"); 10]);
        let dispatcher = DeliveryDispatcher::builder(buffer.clone(), sink.clone())
            .batch_size(10)
            .max_retries(2)
            .with_sleeper(NoopSleeper)
            .build()
            .unwrap();

        assert!(matches!(dispatcher.deliver_next().await, Cycle::Retrying { attempt: 1, .. }));
        assert!(matches!(dispatcher.deliver_next().await, Cycle::Retrying { attempt: 2, .. }));
        buffer.enqueue(click(1)).unwrap();

        assert_eq!(dispatcher.deliver_next().await, Cycle::DeadLettered { events: 1 });
        let letters = dispatcher.dead_letters().entries();
        assert_eq!(positions(&[letters[0].events.clone()]), vec![0]);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(sink.calls(), 3);

        // The late event starts its own attempt count.
        assert!(matches!(dispatcher.deliver_next().await, Cycle::Retrying { attempt: 1, .. }));
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn eviction_cannot_reassign_a_retried_batch() {
        let buffer = Arc::new(EventBuffer::new(2));
        buffer.enqueue(click(0)).unwrap();
        let sink = ScriptedSink::failing(vec![SinkError::transient("down"); 2]);
        let diagnostics = Arc::new(MemoryDiagnostics::new());
        let dispatcher = DeliveryDispatcher::builder(buffer.clone(), sink.clone())
            .batch_size(1)
            .max_retries(2)
            .with_sleeper(NoopSleeper)
            .diagnostics(diagnostics.clone())
            .build()
            .unwrap();

        dispatcher.deliver_next().await;
        dispatcher.deliver_next().await;
        buffer.enqueue(click(1)).unwrap();
        buffer.enqueue(click(2)).unwrap();
        assert_eq!(buffer.evicted(), 0);

        let report = dispatcher.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.delivered, 3);
        assert!(dispatcher.dead_letters().is_empty());
        assert_eq!(positions(&sink.delivered()), vec![0, 1, 2]);
        let attempts: Vec<usize> = diagnostics
            .events()
            .into_iter()
            .filter_map(|e| match e {
                DiagnosticEvent::BatchDelivered { attempts, .. } => Some(attempts),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![3, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_delivers_and_stops() {
        let buffer = filled(3);
        let sink = ScriptedSink::default();
        let dispatcher = Arc::new(
            DeliveryDispatcher::builder(buffer.clone(), sink.clone())
                .interval(Duration::from_millis(100))
                .build()
                .unwrap(),
        );

        let handle = dispatcher.spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(positions(&sink.delivered()), vec![0, 1, 2]);

        buffer.enqueue(click(3)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(positions(&sink.delivered()), vec![0, 1, 2, 3]);

        handle.shutdown().await;
        buffer.enqueue(click(4)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(buffer.len(), 1, "stopped loop must not deliver");
    }

    #[test]
    fn builder_rejects_zero_batch_size_and_interval() {
        let err = DeliveryDispatcher::builder(filled(0), ScriptedSink::default())
            .batch_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "batchSize" }));

        let err = DeliveryDispatcher::builder(filled(0), ScriptedSink::default())
            .interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "flushInterval" }));
    }
}
