//! Tripwire - cross-process incident delivery
//!
//! An application emits incidents into a shared EventStore; one or more
//! agent processes and a dashboard coordinate through files in a state
//! directory. The orchestrator delivers debounced batches to a consumer,
//! holding them back while delivery is paused or any agent is working.
//!
//! ```text
//! .tripwire/
//! ├── events/            # or events.db with the sqlite backend
//! ├── pause.json         # present = paused
//! └── presence/
//!     └── {id}.json      # one per running participant
//! ```
//!
//! # Modules
//!
//! - [`watcher`] - Trigger sources, debouncing and collection passes
//! - [`pause`] - Advisory pause record with staleness self-healing
//! - [`presence`] - Participant records, liveness and the registry
//! - [`orchestrator`] - The delivery gate and its task
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod pause;
pub mod presence;
pub mod watcher;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::{
    BatchConsumer, ChannelConsumer, GateState, JsonLinesConsumer, Orchestrator, OrchestratorConfig, OrchestratorEvent,
    OrchestratorHandle, OrchestratorMetrics, OrchestratorStatus,
};
pub use pause::{PauseConfig, PauseCoordinator, PauseError, PauseRecord};
pub use presence::{
    Liveness, Participant, PresenceChange, PresenceConfig, PresenceError, PresenceRecord, PresenceRegistry,
    PresenceStatus,
};
pub use watcher::{Collected, Collector, Debouncer, Trigger, TriggerSource, WatchMode, WatchTargets, WatcherConfig};
