//! Transactional-table backend
//!
//! Events live in an `events` table; request telemetry in `access_logs`.
//! Claiming is a single IMMEDIATE transaction (select, mark consumed, commit)
//! so two pollers racing the same database can never both receive a row.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, ErrorCode, OpenFlags, Row, TransactionBehavior, params};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::event::{AccessLog, Event, EventKind, MAX_PAYLOAD_BYTES, truncate_utf8};
use crate::store::{Backend, EventStore, RetentionPolicy, RetentionReport, StoreStats};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    type        TEXT    NOT NULL,
    trace_id    TEXT    NOT NULL,
    timestamp   INTEGER NOT NULL,
    environment TEXT,
    feature     TEXT,
    route       TEXT,
    status      INTEGER,
    data        TEXT    NOT NULL CHECK (length(CAST(data AS BLOB)) <= 65536),
    consumed    INTEGER NOT NULL DEFAULT 0,
    consumed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_events_unconsumed ON events (consumed, timestamp, id);

CREATE TABLE IF NOT EXISTS access_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   INTEGER NOT NULL,
    method      TEXT    NOT NULL,
    path        TEXT    NOT NULL,
    status      INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    ip          TEXT,
    feature     TEXT,
    request_id  TEXT,
    input       TEXT CHECK (input IS NULL OR length(CAST(input AS BLOB)) <= 65536),
    error       TEXT CHECK (error IS NULL OR length(CAST(error AS BLOB)) <= 65536),
    user_agent  TEXT CHECK (user_agent IS NULL OR length(CAST(user_agent AS BLOB)) <= 1024)
);

CREATE INDEX IF NOT EXISTS idx_access_logs_timestamp ON access_logs (timestamp);
"#;

const EVENT_COLUMNS: &str = "type, trace_id, timestamp, environment, feature, route, status, data, consumed, consumed_at";

/// How long a writer waits on another process's lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Companion files SQLite may leave next to the database
const COMPANION_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// Event store backed by a SQLite database
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEventStore").field("path", &self.path).finish()
    }
}

impl SqliteEventStore {
    /// Open the database, recreating it from scratch if it is corrupt
    ///
    /// Returns `StoreError::Unavailable` only when the recreated database
    /// cannot be opened either.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "SqliteEventStore::open: called");

        match Self::open_inner(&path) {
            Ok(conn) => Ok(Self {
                conn: Mutex::new(conn),
                path,
            }),
            Err(e) if is_contention(&e) => Err(e),
            Err(e) => {
                warn!(?path, error = %e, "Event database unusable, recreating");
                remove_database_files(&path);
                let conn = Self::open_inner(&path).map_err(|e| {
                    StoreError::Unavailable(format!("{} could not be recreated: {}", path.display(), e))
                })?;
                info!(?path, "Event database recreated empty");
                Ok(Self {
                    conn: Mutex::new(conn),
                    path,
                })
            }
        }
    }

    fn open_inner(path: &Path) -> StoreResult<Connection> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(StoreError::Corrupted(check));
        }

        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(%mode, "open_inner: journal mode set");
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(conn)
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn size_on_disk(&self) -> u64 {
        let main = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let wal = fs::metadata(companion_path(&self.path, "-wal"))
            .map(|m| m.len())
            .unwrap_or(0);
        main + wal
    }

    fn delete_older_than(conn: &Connection, cutoff: i64) -> StoreResult<(usize, usize)> {
        let events = conn.execute(
            "DELETE FROM events WHERE timestamp < ?1 OR (consumed = 1 AND consumed_at < ?1)",
            params![cutoff],
        )?;
        let logs = conn.execute("DELETE FROM access_logs WHERE timestamp < ?1", params![cutoff])?;
        Ok((events, logs))
    }
}

/// Lock contention from another process is not corruption
fn is_contention(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Database(rusqlite::Error::SqliteFailure(e, _))
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn companion_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Delete the database and its companion files, ignoring absence
fn remove_database_files(path: &Path) {
    for candidate in std::iter::once(path.to_path_buf())
        .chain(COMPANION_SUFFIXES.iter().map(|suffix| companion_path(path, suffix)))
    {
        if let Err(e) = fs::remove_file(&candidate)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = ?candidate, error = %e, "Failed to remove database file");
        }
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn cutoff(window: Duration) -> i64 {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    Utc::now().checked_sub_signed(window).map(to_millis).unwrap_or(i64::MIN)
}

/// Parse one `events` row; an unknown type fails the row, not the query
fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let kind: String = row.get(0)?;
    let kind = kind.parse::<EventKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
    })?;
    let status: Option<i64> = row.get(6)?;
    let consumed: i64 = row.get(8)?;
    let consumed_at: Option<i64> = row.get(9)?;

    Ok(Event {
        kind,
        trace_id: row.get(1)?,
        timestamp: from_millis(row.get(2)?),
        environment: row.get(3)?,
        feature: row.get(4)?,
        route: row.get(5)?,
        status: status.and_then(|s| u16::try_from(s).ok()),
        payload: row.get(7)?,
        consumed: consumed != 0,
        consumed_at: consumed_at.map(from_millis),
    })
}

fn row_to_access_log(row: &Row<'_>) -> rusqlite::Result<AccessLog> {
    let status: i64 = row.get(3)?;
    let duration_ms: i64 = row.get(4)?;
    Ok(AccessLog {
        timestamp: from_millis(row.get(0)?),
        method: row.get(1)?,
        path: row.get(2)?,
        status: u16::try_from(status).unwrap_or_default(),
        duration_ms: u64::try_from(duration_ms).unwrap_or_default(),
        ip: row.get(5)?,
        feature: row.get(6)?,
        request_id: row.get(7)?,
        input: row.get(8)?,
        error: row.get(9)?,
        user_agent: row.get(10)?,
    })
}

/// Keep the rows that parsed, log the ones that did not
fn keep_parsed<T>(rows: Vec<rusqlite::Result<T>>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match row {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "Discarding unparseable row");
                None
            }
        })
        .collect()
}

impl EventStore for SqliteEventStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn append(&self, event: &Event) -> StoreResult<()> {
        debug!(kind = %event.kind, trace_id = %event.trace_id, "SqliteEventStore::append: called");
        let mut payload = event.payload.clone();
        truncate_utf8(&mut payload, MAX_PAYLOAD_BYTES);

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events (type, trace_id, timestamp, environment, feature, route, status, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.kind.as_str(),
                event.trace_id,
                to_millis(event.timestamp),
                event.environment,
                event.feature,
                event.route,
                event.status,
                payload,
            ],
        )?;
        Ok(())
    }

    fn drain_unconsumed(&self) -> StoreResult<Vec<Event>> {
        debug!("SqliteEventStore::drain_unconsumed: called");
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM events WHERE consumed = 0 ORDER BY timestamp, id",
                EVENT_COLUMNS
            ))?;
            stmt.query_map([], row_to_event)?.collect::<Vec<_>>()
        };

        let now = Utc::now();
        // The IMMEDIATE lock keeps other writers out, so this matches exactly the selected rows
        let marked = tx.execute(
            "UPDATE events SET consumed = 1, consumed_at = ?1 WHERE consumed = 0",
            params![to_millis(now)],
        )?;
        tx.commit()?;

        let mut events = keep_parsed(rows);
        for event in &mut events {
            event.mark_consumed(now);
        }
        debug!(marked, returned = events.len(), "SqliteEventStore::drain_unconsumed: claimed");
        Ok(events)
    }

    fn recent(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events ORDER BY timestamp DESC, id DESC LIMIT ?1",
            EVENT_COLUMNS
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], row_to_event)?.collect::<Vec<_>>();
        Ok(keep_parsed(rows))
    }

    fn retain(&self, policy: &RetentionPolicy) -> StoreResult<RetentionReport> {
        debug!(?policy, "SqliteEventStore::retain: called");
        let (events_removed, access_logs_removed) = {
            let conn = self.lock()?;
            Self::delete_older_than(&conn, cutoff(policy.max_age))?
        };
        let mut report = RetentionReport {
            events_removed,
            access_logs_removed,
            ..Default::default()
        };

        let size = self.size_on_disk();
        if size > policy.max_size_bytes {
            warn!(
                size,
                max = policy.max_size_bytes,
                "Event database over size ceiling, pruning aggressively"
            );
            let conn = self.lock()?;
            let (events, logs) = Self::delete_older_than(&conn, cutoff(policy.aggressive_window))?;
            report.events_removed += events;
            report.access_logs_removed += logs;
            conn.execute_batch("VACUUM;")?;
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            report.compacted = true;
        }

        if !report.is_empty() {
            info!(?report, size_after = self.size_on_disk(), "Event database retention complete");
        }
        Ok(report)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let (pending, total) = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT COALESCE(SUM(consumed = 0), 0), COUNT(*) FROM events",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )?
        };
        Ok(StoreStats {
            backend: Backend::Sqlite,
            pending: usize::try_from(pending).unwrap_or_default(),
            total: usize::try_from(total).unwrap_or_default(),
            size_bytes: self.size_on_disk(),
        })
    }

    fn log_access(&self, entry: &AccessLog) -> StoreResult<()> {
        let mut entry = entry.clone();
        entry.enforce_limits();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO access_logs
                (timestamp, method, path, status, duration_ms, ip, feature, request_id, input, error, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                to_millis(entry.timestamp),
                entry.method,
                entry.path,
                entry.status,
                i64::try_from(entry.duration_ms).unwrap_or(i64::MAX),
                entry.ip,
                entry.feature,
                entry.request_id,
                entry.input,
                entry.error,
                entry.user_agent,
            ],
        )?;
        Ok(())
    }

    fn recent_access_logs(&self, limit: usize) -> StoreResult<Vec<AccessLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, method, path, status, duration_ms, ip, feature, request_id, input, error, user_agent
             FROM access_logs ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], row_to_access_log)?.collect::<Vec<_>>();
        Ok(keep_parsed(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn event_at(trace: &str, millis: i64) -> Event {
        Event::new(EventKind::Error, trace, "{}").at(from_millis(millis))
    }

    #[test]
    fn test_drain_claims_once_in_order() {
        let temp = TempDir::new().unwrap();
        let store = SqliteEventStore::open(temp.path().join("events.db")).unwrap();
        let now = to_millis(Utc::now());

        // Appended out of order; delivered by timestamp
        store.append(&event_at("e2", now + 1)).unwrap();
        store.append(&event_at("e1", now)).unwrap();
        store.append(&event_at("e3", now + 2)).unwrap();

        let drained = store.drain_unconsumed().unwrap();
        let traces: Vec<_> = drained.iter().map(|e| e.trace_id.as_str()).collect();
        assert_eq!(traces, vec!["e1", "e2", "e3"]);
        assert!(drained.iter().all(|e| e.consumed));
        assert!(store.drain_unconsumed().unwrap().is_empty());

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total, 3);
    }

    #[test]
    fn test_unknown_type_row_is_claimed_and_discarded() {
        let temp = TempDir::new().unwrap();
        let store = SqliteEventStore::open(temp.path().join("events.db")).unwrap();
        store.append(&event_at("good", 1)).unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO events (type, trace_id, timestamp, data) VALUES ('mystery', 'bad', 2, '{}')",
                [],
            )
            .unwrap();

        let drained = store.drain_unconsumed().unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].trace_id, "good");
        assert_eq!(store.stats().unwrap().pending, 0);
    }

    #[test]
    fn test_payload_truncated_to_cap() {
        let temp = TempDir::new().unwrap();
        let store = SqliteEventStore::open(temp.path().join("events.db")).unwrap();
        let mut event = event_at("big", 1);
        event.payload = "y".repeat(70_000);
        store.append(&event).unwrap();

        let drained = store.drain_unconsumed().unwrap();
        assert_eq!(drained[0].payload.len(), 65_536);
    }

    #[test]
    fn test_garbage_file_is_recreated_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.db");
        {
            let store = SqliteEventStore::open(&path).unwrap();
            store.append(&event_at("lost", 1)).unwrap();
        }
        remove_database_files(&path);
        fs::write(&path, vec![0xA5u8; 8192]).unwrap();
        fs::write(companion_path(&path, "-wal"), b"junk").unwrap();

        let store = SqliteEventStore::open(&path).unwrap();
        assert!(store.drain_unconsumed().unwrap().is_empty());
        store.append(&event_at("after", 2)).unwrap();
        assert_eq!(store.drain_unconsumed().unwrap().len(), 1);
    }

    #[test]
    fn test_unrecoverable_path_is_unavailable() {
        let temp = TempDir::new().unwrap();
        // A directory where the database file should be cannot be removed or opened
        let path = temp.path().join("events.db");
        fs::create_dir_all(path.join("occupied")).unwrap();

        let err = SqliteEventStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn test_retention_by_age_and_size() {
        let temp = TempDir::new().unwrap();
        let store = SqliteEventStore::open(temp.path().join("events.db")).unwrap();
        let now = to_millis(Utc::now());

        store.append(&event_at("ancient", now - 10 * 86_400_000)).unwrap();
        store.append(&event_at("two-hours", now - 2 * 3_600_000)).unwrap();
        store.append(&event_at("fresh", now)).unwrap();
        let mut log = AccessLog::new("GET", "/old", 200, 3);
        log.timestamp = from_millis(now - 10 * 86_400_000);
        store.log_access(&log).unwrap();

        let report = store.retain(&RetentionPolicy::default()).unwrap();
        assert_eq!(report.events_removed, 1);
        assert_eq!(report.access_logs_removed, 1);
        assert!(!report.compacted);

        let tight = RetentionPolicy {
            max_size_bytes: 1,
            ..Default::default()
        };
        let report = store.retain(&tight).unwrap();
        assert!(report.compacted);
        assert_eq!(report.events_removed, 1);

        let left = store.drain_unconsumed().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].trace_id, "fresh");
    }

    #[test]
    fn test_access_log_roundtrip_with_caps() {
        let temp = TempDir::new().unwrap();
        let store = SqliteEventStore::open(temp.path().join("events.db")).unwrap();
        let mut log = AccessLog::new("POST", "/api/chat", 429, 88);
        log.user_agent = Some("u".repeat(5000));
        log.request_id = Some("req-1".to_string());
        store.log_access(&log).unwrap();

        let logs = store.recent_access_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, 429);
        assert_eq!(logs[0].user_agent.as_ref().unwrap().len(), 1024);
        assert_eq!(logs[0].request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_racing_stores_never_double_claim() {
        let temp = TempDir::new().unwrap();
        let path = Arc::new(temp.path().join("events.db"));
        let store = SqliteEventStore::open(path.as_path()).unwrap();
        let now = to_millis(Utc::now());

        let producers: Vec<_> = (0..2)
            .map(|p| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || {
                    let store = SqliteEventStore::open(path.as_path()).unwrap();
                    for i in 0..100 {
                        store.append(&event_at(&format!("p{}-{}", p, i), now + i)).unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || {
                    let store = SqliteEventStore::open(path.as_path()).unwrap();
                    let mut seen = Vec::new();
                    for _ in 0..20 {
                        seen.extend(store.drain_unconsumed().unwrap());
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    seen
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.join().unwrap());
        }
        all.extend(store.drain_unconsumed().unwrap());

        let unique: HashSet<_> = all.iter().map(|e| e.trace_id.clone()).collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);
    }
}
