//! EventQueue - the never-failing face of the store
//!
//! Producers and the delivery pipeline talk to this type rather than to a
//! backend directly. Every failure is logged and degraded to a no-op or an
//! empty result, so a broken store can never take down its host process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::event::{AccessLog, Event};
use crate::files::FileEventStore;
use crate::sqlite::SqliteEventStore;
use crate::store::{Backend, EventStore, RetentionPolicy, RetentionReport, StoreStats};

/// Shared handle to an event store that may be unavailable
#[derive(Clone)]
pub struct EventQueue {
    store: Option<Arc<dyn EventStore>>,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("backend", &self.backend())
            .field("available", &self.is_available())
            .finish()
    }
}

impl EventQueue {
    /// Open the configured backend under `state_dir`
    ///
    /// Never fails: if the backend cannot be opened (even after corruption
    /// recovery) the queue is unavailable for its whole lifetime.
    pub fn open(config: &StoreConfig, state_dir: &Path) -> Self {
        debug!(backend = %config.backend, ?state_dir, "EventQueue::open: called");
        let opened: Result<Arc<dyn EventStore>, _> = match config.backend {
            Backend::Files => FileEventStore::open(config.events_dir_in(state_dir)).map(|s| Arc::new(s) as Arc<dyn EventStore>),
            Backend::Sqlite => SqliteEventStore::open(config.db_path_in(state_dir)).map(|s| Arc::new(s) as Arc<dyn EventStore>),
        };

        match opened {
            Ok(store) => {
                info!(backend = %config.backend, "Event store opened");
                Self { store: Some(store) }
            }
            Err(e) => {
                error!(backend = %config.backend, error = %e, "Event store unavailable for this process");
                Self::unavailable()
            }
        }
    }

    /// Wrap an already-open store
    pub fn from_store(store: Arc<dyn EventStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A queue whose every operation is a no-op
    pub fn unavailable() -> Self {
        Self { store: None }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn backend(&self) -> Option<Backend> {
        self.store.as_ref().map(|s| s.backend())
    }

    /// Directory to watch for new records, if the backend has one
    pub fn watch_path(&self) -> Option<PathBuf> {
        self.store
            .as_ref()
            .filter(|s| s.supports_notification())
            .and_then(|s| s.watch_path())
    }

    /// Append one incident; returns false if it was not stored
    pub fn emit(&self, event: Event) -> bool {
        let Some(store) = &self.store else {
            debug!(kind = %event.kind, "EventQueue::emit: store unavailable, dropping event");
            return false;
        };
        match store.append(&event) {
            Ok(()) => true,
            Err(e) => {
                warn!(kind = %event.kind, trace_id = %event.trace_id, error = %e, "Failed to append event");
                false
            }
        }
    }

    /// Claim every unconsumed event, oldest first
    pub fn drain(&self) -> Vec<Event> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        store.drain_unconsumed().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to drain events");
            Vec::new()
        })
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        store.recent(limit).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list recent events");
            Vec::new()
        })
    }

    /// Run one retention pass
    pub fn retain(&self, policy: &RetentionPolicy) -> RetentionReport {
        let Some(store) = &self.store else {
            return RetentionReport::default();
        };
        store.retain(policy).unwrap_or_else(|e| {
            warn!(error = %e, "Retention pass failed");
            RetentionReport::default()
        })
    }

    pub fn stats(&self) -> Option<StoreStats> {
        let store = self.store.as_ref()?;
        store
            .stats()
            .map_err(|e| warn!(error = %e, "Failed to read store stats"))
            .ok()
    }

    /// Record request telemetry (ignored by backends without a log table)
    pub fn log_access(&self, entry: &AccessLog) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.log_access(entry) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %entry.path, error = %e, "Failed to record access log");
                false
            }
        }
    }

    pub fn recent_access_logs(&self, limit: usize) -> Vec<AccessLog> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        store.recent_access_logs(limit).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to list access logs");
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use tempfile::TempDir;

    #[test]
    fn test_open_selects_backend() {
        let temp = TempDir::new().unwrap();

        let files = EventQueue::open(&StoreConfig::default(), temp.path());
        assert_eq!(files.backend(), Some(Backend::Files));
        assert_eq!(files.watch_path(), Some(temp.path().join("events")));

        let sqlite_config = StoreConfig {
            backend: Backend::Sqlite,
            ..Default::default()
        };
        let sqlite = EventQueue::open(&sqlite_config, temp.path());
        assert_eq!(sqlite.backend(), Some(Backend::Sqlite));
        assert!(sqlite.watch_path().is_none());
        assert!(temp.path().join("events.db").exists());
    }

    #[test]
    fn test_unavailable_queue_degrades_to_noops() {
        let queue = EventQueue::unavailable();
        assert!(!queue.is_available());
        assert!(!queue.emit(Event::new(EventKind::Error, "t", "{}")));
        assert!(queue.drain().is_empty());
        assert!(queue.recent(5).is_empty());
        assert_eq!(queue.retain(&RetentionPolicy::default()), RetentionReport::default());
        assert!(queue.stats().is_none());
        assert!(!queue.log_access(&AccessLog::new("GET", "/", 200, 1)));
    }

    #[test]
    fn test_emit_then_drain_both_backends() {
        for backend in [Backend::Files, Backend::Sqlite] {
            let temp = TempDir::new().unwrap();
            let config = StoreConfig {
                backend,
                ..Default::default()
            };
            let queue = EventQueue::open(&config, temp.path());
            assert!(queue.emit(Event::new(EventKind::Crash, "c1", "{}")));
            let drained = queue.drain();
            assert_eq!(drained.len(), 1, "backend {}", backend);
            assert!(queue.drain().is_empty(), "backend {}", backend);
        }
    }
}
