use super::events::DiagnosticEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Consumer of diagnostic events.
///
/// `emit` is synchronous and must not block: it is called from producers' logging path, which
/// does not require an async runtime.
pub trait DiagnosticSink: Send + Sync + std::fmt::Debug {
    fn emit(&self, event: DiagnosticEvent);
}

/// Discards everything.
#[derive(Clone, Debug, Default)]
pub struct NullDiagnostics;

impl DiagnosticSink for NullDiagnostics {
    fn emit(&self, _event: DiagnosticEvent) {}
}

/// Logs each event through `tracing`, at a level matching its severity.
#[derive(Clone, Debug, Default)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
    fn emit(&self, event: DiagnosticEvent) {
        let name = event.name();
        match &event {
            DiagnosticEvent::BatchDelivered { .. } => {
                tracing::debug!(diagnostic = name, event = %event, "searchtrail")
            }
            DiagnosticEvent::OrphanClick(_)
            | DiagnosticEvent::Evicted { .. }
            | DiagnosticEvent::RetryScheduled { .. } => {
                tracing::info!(diagnostic = name, event = %event, "searchtrail")
            }
            DiagnosticEvent::DeadLetterThresholdExceeded { .. } => {
                tracing::error!(diagnostic = name, event = %event, "searchtrail")
            }
            _ => tracing::warn!(diagnostic = name, event = %event, "searchtrail"),
        }
    }
}

/// Keeps the most recent events in memory; evicts the oldest beyond capacity.
#[derive(Clone, Debug)]
pub struct MemoryDiagnostics {
    events: Arc<Mutex<VecDeque<DiagnosticEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }

    /// Number of recorded events with the given `DiagnosticEvent::name`.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemoryDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for MemoryDiagnostics {
    fn emit(&self, event: DiagnosticEvent) {
        let mut guard = self.events.lock().unwrap_or_else(|p| p.into_inner());
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
    }
}

/// Fans events out to any number of subscribers over a tokio broadcast channel.
///
/// Sends with no live subscriber are counted as drops.
#[derive(Clone, Debug)]
pub struct BroadcastDiagnostics {
    sender: tokio::sync::broadcast::Sender<DiagnosticEvent>,
    dropped: Arc<AtomicU64>,
}

impl BroadcastDiagnostics {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender, dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DiagnosticEvent> {
        self.sender.subscribe()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DiagnosticSink for BroadcastDiagnostics {
    fn emit(&self, event: DiagnosticEvent) {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
