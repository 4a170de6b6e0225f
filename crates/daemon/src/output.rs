//! Outbound text sink for progress lines.

use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::lifecycle::Lifecycle;

/// Fire-and-forget line sink.
pub trait OutputSink: Send + Sync {
    /// Queues one line for output. Never blocks.
    fn queue_message(&self, line: String);
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Queue drained to a writer (stdout by default) by a background task.
pub struct StdoutQueue {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    writer: Mutex<Option<Writer>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StdoutQueue {
    /// Creates a queue writing to stdout.
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    /// Creates a queue writing to an arbitrary async writer.
    pub fn with_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            writer: Mutex::new(Some(Box::new(writer))),
            task: Mutex::new(None),
        }
    }
}

impl Default for StdoutQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StdoutQueue {
    fn queue_message(&self, line: String) {
        if self.tx.send(line).is_err() {
            debug!("Output queue closed, dropping line");
        }
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<String>, mut writer: Writer) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to write output line");
            continue;
        }
        if let Err(e) = writer.flush().await {
            warn!(error = %e, "Failed to flush output");
        }
    }
}

impl Lifecycle for StdoutQueue {
    fn name(&self) -> &'static str {
        "output"
    }

    async fn start(&self) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .context("output queue already started")?;
        let writer = self
            .writer
            .lock()
            .ok()
            .and_then(|mut writer| writer.take())
            .context("output writer unavailable")?;

        let handle = tokio::spawn(drain(rx, writer));
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        Ok(())
    }
}
