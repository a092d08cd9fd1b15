//! Presence module: which participant processes are running, and busy
//!
//! Each participant owns one JSON record in the presence directory. A
//! PresenceRegistry in the coordinating process re-reads them, prunes
//! records whose process is gone, and reports what changed.

mod liveness;
mod participant;
mod record;
mod registry;

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use liveness::{Liveness, probe};
pub use participant::Participant;
pub use record::{PresenceRecord, PresenceStatus};
pub use registry::{PresenceChange, PresenceRegistry};

/// Directory name for presence records inside the state directory
pub const PRESENCE_DIR: &str = "presence";

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Presence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Override for the record directory (default `<state-dir>/presence`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl PresenceConfig {
    pub fn dir_in(&self, state_dir: &Path) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| state_dir.join(PRESENCE_DIR))
    }
}
