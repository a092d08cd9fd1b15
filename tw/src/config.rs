//! Tripwire configuration types and loading

use eventstore::{DEFAULT_STATE_DIR, StoreConfig};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::orchestrator::OrchestratorConfig;
use crate::pause::PauseConfig;
use crate::presence::PresenceConfig;
use crate::watcher::WatcherConfig;

/// Main Tripwire configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Directory holding events, pause and presence state
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,

    /// Event storage configuration
    pub storage: StoreConfig,

    /// Trigger and collection configuration
    pub watcher: WatcherConfig,

    /// Pause record configuration
    pub pause: PauseConfig,

    /// Presence record configuration
    pub presence: PresenceConfig,

    /// Orchestrator loop configuration
    pub orchestrator: OrchestratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            storage: StoreConfig::default(),
            watcher: WatcherConfig::default(),
            pause: PauseConfig::default(),
            presence: PresenceConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Config {
    /// Config rooted at `state_dir` with everything else default
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Default::default()
        }
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::default_paths() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Any failure yields None; the full load reports it later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::default_paths().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let value: serde_yaml::Value = serde_yaml::from_str(&content).ok()?;
        value.get("log-level")?.as_str().map(str::to_string)
    }

    /// `./.tripwire.yml`, then `<config_dir>/tripwire/tripwire.yml`
    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".tripwire.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("tripwire").join("tripwire.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn pause_path(&self) -> PathBuf {
        self.pause.path_in(&self.state_dir)
    }

    pub fn presence_dir(&self) -> PathBuf {
        self.presence.dir_in(&self.state_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::WatchMode;
    use eventstore::Backend;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.state_dir, PathBuf::from(".tripwire"));
        assert_eq!(config.storage.backend, Backend::Files);
        assert_eq!(config.watcher.debounce_ms, 1000);
        assert_eq!(config.pause.stale_threshold_minutes, 30);
        assert_eq!(config.pause_path(), PathBuf::from(".tripwire/pause.json"));
        assert_eq!(config.presence_dir(), PathBuf::from(".tripwire/presence"));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug
state-dir: /var/lib/app/.tripwire

storage:
  backend: sqlite
  retention:
    max-age-hours: 48
    max-size-mb: 10

watcher:
  mode: poll
  debounce-ms: 500
  staleness-horizon-secs: 60

pause:
  stale-threshold-minutes: 10

presence:
  dir: /run/app/presence

orchestrator:
  maintenance-interval-secs: 30
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.storage.backend, Backend::Sqlite);
        assert_eq!(config.storage.retention.max_age_hours, 48);
        assert_eq!(config.watcher.mode, WatchMode::Poll);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert_eq!(config.pause.stale_threshold_minutes, 10);
        assert_eq!(config.presence_dir(), PathBuf::from("/run/app/presence"));
        assert_eq!(config.pause_path(), PathBuf::from("/var/lib/app/.tripwire/pause.json"));
        assert_eq!(config.orchestrator.maintenance_interval_secs, 30);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("watcher:\n  debounce-ms: 250\n").unwrap();

        assert_eq!(config.watcher.debounce_ms, 250);
        assert_eq!(config.watcher.poll_interval_ms, 1000);
        assert_eq!(config.state_dir, PathBuf::from(".tripwire"));
        assert_eq!(config.orchestrator.channel_buffer, 100);
    }

    #[test]
    fn test_load_explicit_path_and_log_level() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tw.yml");
        fs::write(&path, "log-level: trace\nstate-dir: /tmp/x\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/x"));
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("trace"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let missing = PathBuf::from("/nonexistent/tripwire.yml");
        assert!(Config::load(Some(&missing)).is_err());
        assert!(Config::load_log_level(Some(&missing)).is_none());
    }
}
