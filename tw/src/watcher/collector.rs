//! One collection pass over the event store

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use eventstore::{Event, EventQueue};
use tracing::{debug, info};

/// Result of a pass that actually ran
#[derive(Debug, Default)]
pub struct Collected {
    /// Deliverable events in creation order
    pub events: Vec<Event>,
    /// Records discarded as older than the staleness horizon
    pub stale: usize,
    /// Lifecycle records claimed but not delivered
    pub lifecycle: usize,
}

/// Clears the in-flight flag when a pass ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the store and filters what comes out
///
/// Clones share the in-flight flag, so at most one pass runs at a time
/// across all of them.
#[derive(Debug, Clone)]
pub struct Collector {
    queue: EventQueue,
    staleness_horizon: Duration,
    deliver_lifecycle: bool,
    in_flight: Arc<AtomicBool>,
}

impl Collector {
    pub fn new(queue: EventQueue, staleness_horizon: Duration, deliver_lifecycle: bool) -> Self {
        Self {
            queue,
            staleness_horizon,
            deliver_lifecycle,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one pass, or return None if another pass is still running
    pub fn collect(&self) -> Option<Collected> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Collector::collect: pass already in flight, skipping");
            return None;
        }
        let _guard = InFlight(&self.in_flight);

        let drained = self.queue.drain();
        debug!(count = drained.len(), "Collector::collect: drained");

        Some(self.filter(drained))
    }

    fn filter(&self, drained: Vec<Event>) -> Collected {
        let now = Utc::now();
        let horizon = chrono::Duration::from_std(self.staleness_horizon).unwrap_or(chrono::Duration::MAX);
        let mut collected = Collected::default();

        for event in drained {
            if event.age(now) > horizon {
                collected.stale += 1;
                continue;
            }
            if event.kind.is_lifecycle() && !self.deliver_lifecycle {
                collected.lifecycle += 1;
                continue;
            }
            collected.events.push(event);
        }

        if collected.stale > 0 {
            info!(stale = collected.stale, "Discarded events older than the staleness horizon");
        }

        collected.events.sort_by_key(|e| e.timestamp);
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstore::{EventKind, StoreConfig};
    use tempfile::TempDir;

    fn setup() -> (TempDir, EventQueue) {
        let temp = TempDir::new().unwrap();
        let queue = EventQueue::open(&StoreConfig::default(), temp.path());
        (temp, queue)
    }

    #[test]
    fn test_pass_discards_stale_and_sorts() {
        let (_temp, queue) = setup();
        let now = Utc::now();
        queue.emit(Event::new(EventKind::Error, "old", "{}").at(now - chrono::Duration::minutes(10)));
        queue.emit(Event::new(EventKind::Error, "b", "{}").at(now - chrono::Duration::seconds(1)));
        queue.emit(Event::new(EventKind::Crash, "a", "{}").at(now - chrono::Duration::seconds(2)));

        let collector = Collector::new(queue.clone(), Duration::from_secs(300), false);
        let collected = collector.collect().unwrap();

        let traces: Vec<_> = collected.events.iter().map(|e| e.trace_id.as_str()).collect();
        assert_eq!(traces, vec!["a", "b"]);
        assert_eq!(collected.stale, 1);

        // Stale records were claimed too
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_lifecycle_records_filtered_unless_enabled() {
        let (_temp, queue) = setup();
        queue.emit(Event::new(EventKind::AgentStart, "agent", "{}"));
        queue.emit(Event::new(EventKind::Error, "e", "{}"));

        let collected = Collector::new(queue.clone(), Duration::from_secs(300), false)
            .collect()
            .unwrap();
        assert_eq!(collected.events.len(), 1);
        assert_eq!(collected.lifecycle, 1);

        queue.emit(Event::new(EventKind::AgentStop, "agent", "{}"));
        let collected = Collector::new(queue, Duration::from_secs(300), true).collect().unwrap();
        assert_eq!(collected.events.len(), 1);
        assert_eq!(collected.events[0].kind, EventKind::AgentStop);
    }

    #[test]
    fn test_overlapping_pass_is_skipped() {
        let (_temp, queue) = setup();
        let collector = Collector::new(queue, Duration::from_secs(300), false);
        let other = collector.clone();

        collector.in_flight.store(true, Ordering::Release);
        assert!(other.is_running());
        assert!(other.collect().is_none());

        collector.in_flight.store(false, Ordering::Release);
        assert!(other.collect().is_some());
        assert!(!collector.is_running());
    }

    #[test]
    fn test_unavailable_queue_yields_empty_pass() {
        let collector = Collector::new(EventQueue::unavailable(), Duration::from_secs(1), false);
        let collected = collector.collect().unwrap();
        assert!(collected.events.is_empty());
    }
}
