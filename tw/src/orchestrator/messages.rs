//! Message types for the Orchestrator

use eventstore::Backend;
use serde::Serialize;
use tokio::sync::oneshot;

use super::gate::GateState;
use crate::pause::PauseRecord;
use crate::presence::{PresenceChange, PresenceRecord};
use crate::watcher::Trigger;

/// Requests to the Orchestrator task
#[derive(Debug)]
pub enum OrchestratorRequest {
    /// Something may have changed; same as a trigger source firing
    Trigger(Trigger),

    /// Get a point-in-time status
    GetStatus {
        reply_tx: oneshot::Sender<OrchestratorStatus>,
    },

    /// Shutdown the orchestrator
    Shutdown,
}

/// Notifications broadcast by the Orchestrator
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    GateChanged { from: GateState, to: GateState },

    Presence(PresenceChange),

    /// A batch reached the consumer
    BatchDelivered { count: usize, from_buffer: bool },

    /// The consumer failed on a batch; the batch is dropped
    ConsumerFailed { count: usize, error: String },
}

/// Orchestrator metrics for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorMetrics {
    pub triggers: u64,
    pub coalesced_triggers: u64,
    pub passes: u64,
    pub skipped_passes: u64,
    pub events_collected: u64,
    pub stale_discarded: u64,
    pub batches_delivered: u64,
    pub events_delivered: u64,
    pub consumer_failures: u64,
    pub maintenance_runs: u64,
    pub skipped_maintenance: u64,
}

/// Snapshot returned by `OrchestratorHandle::status`
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub gate: GateState,
    /// Events held back while the gate is closed
    pub buffered: usize,
    pub pause: Option<PauseRecord>,
    pub participants: Vec<PresenceRecord>,
    pub backend: Option<Backend>,
    pub store_available: bool,
    pub metrics: OrchestratorMetrics,
}
