//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between maintenance sweeps (presence liveness, retention)
    #[serde(rename = "maintenance-interval-secs", default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Channel buffer size for orchestrator requests
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Capacity of the broadcast channel for orchestrator events
    #[serde(rename = "event-buffer", default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_maintenance_interval_secs() -> u64 {
    debug!("default_maintenance_interval_secs: called");
    300
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    100
}

fn default_event_buffer() -> usize {
    debug!("default_event_buffer: called");
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        debug!("OrchestratorConfig::default: called");
        Self {
            maintenance_interval_secs: 300,
            channel_buffer: 100,
            event_buffer: 256,
        }
    }
}

impl OrchestratorConfig {
    /// Get the maintenance interval as a Duration
    pub fn maintenance_interval(&self) -> Duration {
        debug!(maintenance_interval_secs = %self.maintenance_interval_secs, "OrchestratorConfig::maintenance_interval: called");
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}
