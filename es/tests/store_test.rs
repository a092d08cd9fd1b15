//! Integration tests for the event store
//!
//! These run both backends through the same contract.

use std::sync::Arc;
use std::thread;

use assert_cmd::Command;
use chrono::{Duration, Utc};
use eventstore::{
    Backend, Event, EventKind, EventQueue, EventStore, FileEventStore, MAX_PAYLOAD_BYTES, SqliteEventStore, StoreConfig,
};
use predicates::prelude::*;
use tempfile::TempDir;

fn open_store(backend: Backend, temp: &TempDir) -> Arc<dyn EventStore> {
    match backend {
        Backend::Files => Arc::new(FileEventStore::open(temp.path().join("events")).expect("open files store")),
        Backend::Sqlite => Arc::new(SqliteEventStore::open(temp.path().join("events.db")).expect("open sqlite store")),
    }
}

// =============================================================================
// Contract Tests
// =============================================================================

#[test]
fn test_drain_returns_appended_events_once_in_order() {
    for backend in [Backend::Files, Backend::Sqlite] {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(backend, &temp);

        let base = Utc::now() - Duration::seconds(10);
        for (i, trace) in ["E1", "E2", "E3"].iter().enumerate() {
            let event = Event::new(EventKind::Error, *trace, "{}").at(base + Duration::milliseconds(i as i64 * 5));
            store.append(&event).expect("append");
        }

        let drained = store.drain_unconsumed().expect("drain");
        let traces: Vec<_> = drained.iter().map(|e| e.trace_id.as_str()).collect();
        assert_eq!(traces, vec!["E1", "E2", "E3"], "backend {}", backend);

        let second = store.drain_unconsumed().expect("second drain");
        assert!(second.is_empty(), "backend {} redelivered {:?}", backend, second);
    }
}

#[test]
fn test_oversized_payload_truncated_to_cap() {
    for backend in [Backend::Files, Backend::Sqlite] {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = open_store(backend, &temp);

        let mut event = Event::new(EventKind::Crash, "big", "");
        event.payload = "x".repeat(70_000);
        store.append(&event).expect("append");

        let drained = store.drain_unconsumed().expect("drain");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].payload.len(), MAX_PAYLOAD_BYTES, "backend {}", backend);
    }
}

#[test]
fn test_garbage_database_is_recreated_empty() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp.path().join("events.db");

    {
        let store = SqliteEventStore::open(&db_path).expect("open");
        store.append(&Event::new(EventKind::Error, "before", "{}")).expect("append");
    }

    std::fs::write(&db_path, b"this is definitely not a sqlite database, just noise").expect("write garbage");
    let _ = std::fs::remove_file(temp.path().join("events.db-wal"));
    let _ = std::fs::remove_file(temp.path().join("events.db-shm"));

    let store = SqliteEventStore::open(&db_path).expect("recovered open");
    assert!(store.drain_unconsumed().expect("drain").is_empty());

    store.append(&Event::new(EventKind::Error, "after", "{}")).expect("append after recovery");
    let drained = store.drain_unconsumed().expect("drain");
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].trace_id, "after");
}

#[test]
fn test_independent_handles_claim_each_event_once() {
    for backend in [Backend::Files, Backend::Sqlite] {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let producer = open_store(backend, &temp);
        for i in 0..60 {
            producer
                .append(&Event::new(EventKind::RateLimit, format!("t{}", i), "{}"))
                .expect("append");
        }

        // Separate handles stand in for separate processes
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let store = open_store(backend, &temp);
                thread::spawn(move || {
                    let mut claimed = Vec::new();
                    for _ in 0..5 {
                        claimed.extend(store.drain_unconsumed().expect("drain"));
                    }
                    claimed
                })
            })
            .collect();

        let mut all: Vec<String> = consumers
            .into_iter()
            .flat_map(|h| h.join().expect("consumer thread"))
            .map(|e| e.trace_id)
            .collect();
        all.sort();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "backend {} double-claimed", backend);
        assert_eq!(all.len(), 60, "backend {} lost events", backend);
    }
}

#[test]
fn test_queue_over_unopenable_path_is_unavailable() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    // A directory where the database file should be cannot be opened or recreated
    std::fs::create_dir_all(temp.path().join("events.db").join("blocker")).expect("mkdir");

    let config = StoreConfig {
        backend: Backend::Sqlite,
        ..Default::default()
    };
    let queue = EventQueue::open(&config, temp.path());
    assert!(!queue.is_available());
    assert!(!queue.emit(Event::new(EventKind::Error, "lost", "{}")));
    assert!(queue.drain().is_empty());
}

// =============================================================================
// CLI Tests
// =============================================================================

#[test]
fn test_cli_emit_then_stats_and_drain() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let state = temp.path().to_str().expect("utf8 path");

    Command::cargo_bin("es")
        .expect("es binary")
        .args(["--state-dir", state, "emit", "crash", "--trace-id", "cli-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cli-1"));

    Command::cargo_bin("es")
        .expect("es binary")
        .args(["--state-dir", state, "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending: 1"));

    Command::cargo_bin("es")
        .expect("es binary")
        .args(["--state-dir", state, "drain", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"traceId\":\"cli-1\""));

    Command::cargo_bin("es")
        .expect("es binary")
        .args(["--state-dir", state, "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending: 0"));
}
