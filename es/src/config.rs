//! Configuration for the event store
//!
//! The store reads the same `tripwire.yml` as the coordinator; keys it does
//! not know are ignored.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::{Backend, RetentionPolicy};

/// Default directory holding all shared coordination state
pub const DEFAULT_STATE_DIR: &str = ".tripwire";

/// Top-level configuration as seen by the `es` binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding events, pause and presence state
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,

    /// Event storage configuration
    pub storage: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            storage: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)
                .context(format!("Failed to read config file {}", config_path.display()))?;
            let config: Config = serde_yaml::from_str(&content).context("Failed to parse config file")?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            Some(PathBuf::from(".tripwire.yml")),
            dirs::config_dir().map(|p| p.join("tripwire").join("tripwire.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }
}

/// Which backend to use and where it keeps its data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `files` or `sqlite`
    pub backend: Backend,

    /// Record directory for the files backend (default `<state-dir>/events`)
    #[serde(rename = "events-dir", skip_serializing_if = "Option::is_none")]
    pub events_dir: Option<PathBuf>,

    /// Database path for the sqlite backend (default `<state-dir>/events.db`)
    #[serde(rename = "db-path", skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// Retention limits
    pub retention: RetentionConfig,
}

impl StoreConfig {
    pub fn events_dir_in(&self, state_dir: &Path) -> PathBuf {
        self.events_dir.clone().unwrap_or_else(|| state_dir.join("events"))
    }

    pub fn db_path_in(&self, state_dir: &Path) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| state_dir.join("events.db"))
    }
}

/// Retention limits as written in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    #[serde(rename = "max-age-hours")]
    pub max_age_hours: u64,

    #[serde(rename = "max-size-mb")]
    pub max_size_mb: u64,

    #[serde(rename = "aggressive-window-minutes")]
    pub aggressive_window_minutes: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 7 * 24,
            max_size_mb: 50,
            aggressive_window_minutes: 60,
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: Duration::from_secs(self.max_age_hours.saturating_mul(3600)),
            max_size_bytes: self.max_size_mb.saturating_mul(1024 * 1024),
            aggressive_window: Duration::from_secs(self.aggressive_window_minutes.saturating_mul(60)),
        }
    }
}
