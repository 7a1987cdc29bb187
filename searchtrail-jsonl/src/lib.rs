//! JSONL sink for `searchtrail`. Appends one event per line, one write per batch.
//! Always writes; bring your own path.
//!
//! I/O failures are classified for the dispatcher: interruptions, timeouts, `WouldBlock` and
//! short writes are transient and retried; anything else (missing directory, permissions,
//! full disk) is permanent and dead-letters the batch.

use searchtrail::{event_to_json, Batch, SinkError};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Map an I/O failure onto the dispatcher's retry classification.
pub fn classify(err: &io::Error) -> SinkError {
    match err.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::WriteZero => SinkError::transient(err.to_string()),
        _ => SinkError::permanent(err.to_string()),
    }
}

fn encode(batch: &Batch) -> String {
    let mut out = String::new();
    for event in batch {
        out.push_str(&event_to_json(event).to_string());
        out.push('\n');
    }
    out
}

impl tower_service::Service<Batch> for JsonlSink {
    type Response = ();
    type Error = SinkError;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: Batch) -> Self::Future {
        let path = self.path.clone();
        let lines = encode(&batch);
        let count = batch.len();
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let write = async {
                let mut file =
                    tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
                file.write_all(lines.as_bytes()).await?;
                file.flush().await
            };
            write.await.map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "jsonl write failed");
                classify(&e)
            })?;
            tracing::trace!(path = %path.display(), events = count, "jsonl batch appended");
            Ok(())
        })
    }
}
