//! The EventStore contract shared by both backends

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::event::{AccessLog, Event};

/// Storage strategy selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One JSON file per event in a directory
    #[default]
    Files,
    /// Rows in a SQLite table
    Sqlite,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Files => write!(f, "files"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// How long records are kept and how large the store may grow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Records (and access logs) older than this are pruned
    pub max_age: Duration,
    /// On-disk ceiling that triggers an aggressive prune
    pub max_size_bytes: u64,
    /// Window kept by the aggressive prune
    pub aggressive_window: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 3600),
            max_size_bytes: 50 * 1024 * 1024,
            aggressive_window: Duration::from_secs(3600),
        }
    }
}

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub events_removed: usize,
    pub access_logs_removed: usize,
    pub temp_files_removed: usize,
    /// Whether the size ceiling forced an aggressive prune
    pub compacted: bool,
}

impl RetentionReport {
    pub fn is_empty(&self) -> bool {
        self.events_removed == 0 && self.access_logs_removed == 0 && self.temp_files_removed == 0 && !self.compacted
    }
}

/// Point-in-time counters for a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub backend: Backend,
    /// Unconsumed events
    pub pending: usize,
    /// All retained events, consumed or not
    pub total: usize,
    /// Bytes on disk
    pub size_bytes: u64,
}

/// Durable append-only record of incidents
///
/// Every backend guarantees that `drain_unconsumed` hands each record to at
/// most one caller, even when several processes drain the same store.
pub trait EventStore: Send + Sync {
    /// Which strategy this is
    fn backend(&self) -> Backend;

    /// Append one event (payload is truncated to the cap, never rejected)
    fn append(&self, event: &Event) -> StoreResult<()>;

    /// Atomically claim and return every unconsumed event, oldest first
    fn drain_unconsumed(&self) -> StoreResult<Vec<Event>>;

    /// Most recent events, newest first, without claiming them
    fn recent(&self, limit: usize) -> StoreResult<Vec<Event>>;

    /// Prune by age and size
    fn retain(&self, policy: &RetentionPolicy) -> StoreResult<RetentionReport>;

    /// Counters for status output
    fn stats(&self) -> StoreResult<StoreStats>;

    /// Record request telemetry; backends without a log table ignore it
    fn log_access(&self, _entry: &AccessLog) -> StoreResult<()> {
        Ok(())
    }

    /// Most recent access logs, newest first
    fn recent_access_logs(&self, _limit: usize) -> StoreResult<Vec<AccessLog>> {
        Ok(Vec::new())
    }

    /// Whether new records can be observed through filesystem notification
    fn supports_notification(&self) -> bool {
        false
    }

    /// Directory to watch when `supports_notification` is true
    fn watch_path(&self) -> Option<PathBuf> {
        None
    }
}
