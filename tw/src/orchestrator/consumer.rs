//! Batch consumers

use std::io::Write;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use eventstore::Event;
use eyre::{Result, eyre};
use futures::FutureExt;
use tokio::sync::mpsc;

/// Receives ordered batches of events from the orchestrator
///
/// Errors and panics are caught by the orchestrator; the batch is counted
/// as failed and the gate is left as it was.
#[async_trait]
pub trait BatchConsumer: Send + Sync {
    async fn deliver(&self, batch: Vec<Event>) -> Result<()>;
}

/// Forwards each batch over an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: mpsc::Sender<Vec<Event>>,
}

impl ChannelConsumer {
    pub fn new(tx: mpsc::Sender<Vec<Event>>) -> Self {
        Self { tx }
    }

    /// A consumer and the receiving end of its channel
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Vec<Event>>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl BatchConsumer for ChannelConsumer {
    async fn deliver(&self, batch: Vec<Event>) -> Result<()> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| eyre!("Batch receiver closed"))
    }
}

/// Writes every event as one JSON line on stdout
#[derive(Debug, Default)]
pub struct JsonLinesConsumer;

#[async_trait]
impl BatchConsumer for JsonLinesConsumer {
    async fn deliver(&self, batch: Vec<Event>) -> Result<()> {
        let mut out = std::io::stdout().lock();
        for event in &batch {
            serde_json::to_writer(&mut out, event)?;
            writeln!(out)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Run `consumer` on `batch`, turning errors and panics into a message
pub(crate) async fn deliver_guarded(consumer: &dyn BatchConsumer, batch: Vec<Event>) -> std::result::Result<(), String> {
    match AssertUnwindSafe(consumer.deliver(batch)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("consumer panicked: {}", message))
        }
    }
}
