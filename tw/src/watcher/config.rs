//! Watcher configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// How new records are detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Filesystem change notification, falling back to polling
    #[default]
    Notify,
    /// Fixed-interval timer only
    Poll,
}

/// Configuration for trigger sources and collection passes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Detection strategy (sqlite storage always polls)
    #[serde(default)]
    pub mode: WatchMode,

    /// Quiet period that coalesces a burst of triggers into one pass
    #[serde(rename = "debounce-ms", default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Timer interval when polling for new events
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Records older than this are treated as orphaned and discarded
    #[serde(rename = "staleness-horizon-secs", default = "default_staleness_horizon_secs")]
    pub staleness_horizon_secs: u64,

    /// Timer interval for re-reading pause and presence state
    #[serde(rename = "signal-refresh-ms", default = "default_signal_refresh_ms")]
    pub signal_refresh_ms: u64,

    /// Hand agent_start/agent_stop records to the consumer too
    #[serde(rename = "deliver-lifecycle", default)]
    pub deliver_lifecycle: bool,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_staleness_horizon_secs() -> u64 {
    300
}

fn default_signal_refresh_ms() -> u64 {
    2000
}

impl Default for WatcherConfig {
    fn default() -> Self {
        debug!("WatcherConfig::default: called");
        Self {
            mode: WatchMode::Notify,
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            staleness_horizon_secs: default_staleness_horizon_secs(),
            signal_refresh_ms: default_signal_refresh_ms(),
            deliver_lifecycle: false,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn staleness_horizon(&self) -> Duration {
        Duration::from_secs(self.staleness_horizon_secs)
    }

    pub fn signal_refresh(&self) -> Duration {
        Duration::from_millis(self.signal_refresh_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatcherConfig::default();
        assert_eq!(config.mode, WatchMode::Notify);
        assert_eq!(config.debounce(), Duration::from_secs(1));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.staleness_horizon(), Duration::from_secs(300));
        assert_eq!(config.signal_refresh(), Duration::from_secs(2));
        assert!(!config.deliver_lifecycle);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: WatcherConfig = serde_yaml::from_str("mode: poll\ndebounce-ms: 250\n").unwrap();
        assert_eq!(config.mode, WatchMode::Poll);
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.staleness_horizon_secs, 300);
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = WatcherConfig {
            poll_interval_ms: 0,
            signal_refresh_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.signal_refresh(), Duration::from_millis(1));
    }
}
