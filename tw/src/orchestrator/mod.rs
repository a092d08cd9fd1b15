//! Orchestrator - debounced, gated delivery of incidents to one consumer
//!
//! A single task owns the collector, the pause and presence repositories,
//! and the buffer. The gate is one of:
//! - **Flowing:** batches go straight to the consumer
//! - **Buffering (paused):** a live pause record exists
//! - **Buffering (busy):** some participant is working
//!
//! Re-entering Flowing flushes the whole buffer as one batch.

mod config;
mod consumer;
mod core;
mod gate;
mod handle;
mod messages;

pub use config::OrchestratorConfig;
pub use consumer::{BatchConsumer, ChannelConsumer, JsonLinesConsumer};
pub use core::Orchestrator;
pub use gate::GateState;
pub use handle::OrchestratorHandle;
pub use messages::{OrchestratorEvent, OrchestratorMetrics, OrchestratorRequest, OrchestratorStatus};
