//! PauseCoordinator - advisory single-slot pause shared across processes
//!
//! The presence of `pause.json` means "paused". Any participant may write it
//! (last writer wins) or delete it. Readers always go to disk, and a record
//! older than the stale threshold is deleted on sight so a crashed holder
//! cannot wedge delivery forever.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use eventstore::atomic::{remove_if_exists, write_atomic};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name of the pause record inside the state directory
pub const PAUSE_FILE: &str = "pause.json";

#[derive(Error, Debug)]
pub enum PauseError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pause configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseConfig {
    /// A record older than this is treated as abandoned
    #[serde(rename = "stale-threshold-minutes", default = "default_stale_threshold_minutes")]
    pub stale_threshold_minutes: u64,

    /// Override for the pause file (default `<state-dir>/pause.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_stale_threshold_minutes() -> u64 {
    30
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            stale_threshold_minutes: default_stale_threshold_minutes(),
            path: None,
        }
    }
}

impl PauseConfig {
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_minutes.saturating_mul(60))
    }

    pub fn path_in(&self, state_dir: &Path) -> PathBuf {
        self.path.clone().unwrap_or_else(|| state_dir.join(PAUSE_FILE))
    }
}

/// Who paused delivery, when, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRecord {
    pub by: String,
    pub since: DateTime<Utc>,
    pub reason: String,
}

impl PauseRecord {
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        now - self.since > threshold
    }
}

/// Repository for the pause record; holds no cached state
#[derive(Debug, Clone)]
pub struct PauseCoordinator {
    path: PathBuf,
    stale_threshold: Duration,
}

impl PauseCoordinator {
    pub fn new(path: impl Into<PathBuf>, stale_threshold: Duration) -> Self {
        Self {
            path: path.into(),
            stale_threshold,
        }
    }

    pub fn from_config(config: &PauseConfig, state_dir: &Path) -> Self {
        Self::new(config.path_in(state_dir), config.stale_threshold())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write (or overwrite) the pause record
    pub fn pause(&self, reason: &str, by: &str) -> Result<PauseRecord, PauseError> {
        debug!(%reason, %by, "PauseCoordinator::pause: called");
        let record = PauseRecord {
            by: by.to_string(),
            since: Utc::now(),
            reason: reason.to_string(),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.path, &json)?;
        info!(%by, %reason, "Delivery paused");
        Ok(record)
    }

    /// Delete the pause record; returns false if there was none
    pub fn resume(&self) -> Result<bool, PauseError> {
        debug!("PauseCoordinator::resume: called");
        let removed = remove_if_exists(&self.path)?;
        if removed {
            info!("Delivery resumed");
        }
        Ok(removed)
    }

    /// Current record, clearing it if stale or unreadable
    pub fn read(&self) -> Option<PauseRecord> {
        self.read_at(Utc::now())
    }

    /// `read` as of `now`
    pub fn read_at(&self, now: DateTime<Utc>) -> Option<PauseRecord> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read pause record, treating as unpaused");
                return None;
            }
        };

        let record: PauseRecord = match serde_json::from_slice(&content) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Discarding unparseable pause record");
                self.clear();
                return None;
            }
        };

        if record.is_stale(now, self.stale_threshold) {
            warn!(by = %record.by, since = %record.since, "Clearing stale pause record");
            self.clear();
            return None;
        }

        Some(record)
    }

    pub fn is_paused(&self) -> bool {
        self.read().is_some()
    }

    fn clear(&self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(path = ?self.path, error = %e, "Failed to remove pause record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PauseCoordinator) {
        let temp = TempDir::new().unwrap();
        let pause = PauseCoordinator::new(temp.path().join(PAUSE_FILE), Duration::from_secs(30 * 60));
        (temp, pause)
    }

    #[test]
    fn test_pause_then_resume() {
        let (_temp, pause) = setup();
        assert!(!pause.is_paused());

        let record = pause.pause("fixing bug", "agent-1").unwrap();
        assert_eq!(pause.read(), Some(record));

        assert!(pause.resume().unwrap());
        assert!(!pause.is_paused());
        assert!(!pause.resume().unwrap());
    }

    #[test]
    fn test_last_writer_wins() {
        let (_temp, pause) = setup();
        pause.pause("first", "agent-1").unwrap();
        pause.pause("second", "agent-2").unwrap();

        let record = pause.read().unwrap();
        assert_eq!(record.by, "agent-2");
        assert_eq!(record.reason, "second");
    }

    #[test]
    fn test_concurrent_pauses_both_succeed() {
        let (_temp, pause) = setup();
        let pause = std::sync::Arc::new(pause);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pause = std::sync::Arc::clone(&pause);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        pause.pause("racing", &format!("agent-{}", i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pause.read().unwrap().by.starts_with("agent-"));
    }

    #[test]
    fn test_huge_threshold_saturates() {
        let config = PauseConfig {
            stale_threshold_minutes: u64::MAX,
            path: None,
        };
        assert_eq!(config.stale_threshold(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_stale_record_cleared_on_read() {
        let (_temp, pause) = setup();
        pause.pause("long fix", "agent-1").unwrap();

        let later = Utc::now() + chrono::Duration::minutes(31);
        assert!(pause.read_at(later).is_none());
        assert!(!pause.path().exists());
        assert!(!pause.is_paused());
    }

    #[test]
    fn test_record_within_threshold_survives() {
        let (_temp, pause) = setup();
        pause.pause("fix", "agent-1").unwrap();
        let later = Utc::now() + chrono::Duration::minutes(29);
        assert!(pause.read_at(later).is_some());
        assert!(pause.path().exists());
    }

    #[test]
    fn test_garbage_record_is_discarded() {
        let (_temp, pause) = setup();
        fs::write(pause.path(), b"{not json").unwrap();
        assert!(pause.read().is_none());
        assert!(!pause.path().exists());
    }

    #[test]
    fn test_wire_format() {
        let (_temp, pause) = setup();
        pause.pause("deploy", "dash").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&fs::read(pause.path()).unwrap()).unwrap();
        assert_eq!(value["by"], "dash");
        assert_eq!(value["reason"], "deploy");
        assert!(value["since"].is_string());
    }
}
