//! Presence record wire format

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Idle,
    Working,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Working => write!(f, "working"),
        }
    }
}

/// One running participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub id: String,
    pub pid: u32,
    pub status: PresenceStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn new(id: impl Into<String>, pid: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            pid,
            status: PresenceStatus::Idle,
            started_at: now,
            last_activity: now,
        }
    }

    pub fn is_working(&self) -> bool {
        self.status == PresenceStatus::Working
    }

    /// Path of this record inside `dir`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.id))
    }
}
