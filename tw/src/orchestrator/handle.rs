//! OrchestratorHandle - Client interface to a running Orchestrator

use eyre::{Result, eyre};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::messages::{OrchestratorEvent, OrchestratorRequest, OrchestratorStatus};
use crate::watcher::Trigger;

/// Cloneable handle for talking to the Orchestrator task
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<OrchestratorRequest>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
}

impl OrchestratorHandle {
    pub(crate) fn new(tx: mpsc::Sender<OrchestratorRequest>, events_tx: broadcast::Sender<OrchestratorEvent>) -> Self {
        Self { tx, events_tx }
    }

    /// Poke the orchestrator as if a trigger source had fired
    pub async fn trigger(&self, trigger: Trigger) -> Result<()> {
        debug!(?trigger, "OrchestratorHandle::trigger: called");
        self.tx
            .send(OrchestratorRequest::Trigger(trigger))
            .await
            .map_err(|_| eyre!("Orchestrator channel closed"))
    }

    /// Current gate, buffer, participants and metrics
    pub async fn status(&self) -> Result<OrchestratorStatus> {
        debug!("OrchestratorHandle::status: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(OrchestratorRequest::GetStatus { reply_tx })
            .await
            .map_err(|_| eyre!("Orchestrator channel closed"))?;
        reply_rx.await.map_err(|_| eyre!("Orchestrator dropped status request"))
    }

    /// Ask the orchestrator to stop
    pub async fn shutdown(&self) -> Result<()> {
        debug!("OrchestratorHandle::shutdown: called");
        self.tx
            .send(OrchestratorRequest::Shutdown)
            .await
            .map_err(|_| eyre!("Orchestrator channel closed"))
    }

    /// Receive gate, presence and delivery notifications
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events_tx.subscribe()
    }
}
