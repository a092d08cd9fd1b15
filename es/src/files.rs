//! Directory-of-records backend
//!
//! Layout:
//!
//! ```text
//! events/
//! ├── 1718000000123-error-3f9a1c2e.json
//! ├── 1718000000456-crash-b71d09aa.json
//! └── .1718000000789-error-0c1d2e3f.json.4242.9a8b7c6d5e4f.tmp   # in-flight write, ignored
//! ```
//!
//! A record is claimed by deleting it: the filesystem lets exactly one
//! process win the delete, and only the winner delivers the record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::atomic::{is_hidden, remove_if_exists, write_atomic};
use crate::error::StoreResult;
use crate::event::{Event, MAX_PAYLOAD_BYTES, truncate_utf8};
use crate::store::{Backend, EventStore, RetentionPolicy, RetentionReport, StoreStats};

const RECORD_EXTENSION: &str = "json";

/// Temp files older than this are leftovers from a crashed writer
const ORPHAN_TEMP_AGE: Duration = Duration::from_secs(60);

/// Event store keeping one JSON file per event
#[derive(Debug)]
pub struct FileEventStore {
    dir: PathBuf,
}

impl FileEventStore {
    /// Open (and create if needed) the record directory
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        debug!(?dir, "FileEventStore::open: called");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a new record: `<epochMillis>-<type>-<shortId>.json`
    pub fn record_name(event: &Event) -> String {
        let id = Uuid::now_v7().simple().to_string();
        let short_id = &id[id.len() - 8..];
        format!(
            "{:013}-{}-{}.{}",
            event.timestamp.timestamp_millis().max(0),
            event.kind,
            short_id,
            RECORD_EXTENSION
        )
    }

    /// Millisecond prefix of a record name, if it has one
    fn name_millis(name: &str) -> Option<i64> {
        name.split('-').next()?.parse().ok()
    }

    /// Visible record files, sorted by name (creation order)
    fn list_records(&self) -> io::Result<Vec<(String, PathBuf)>> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e),
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&name) {
                continue;
            }
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
                records.push((name, path));
            }
        }

        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    /// Read and parse a record without claiming it
    fn read_record(path: &Path) -> Option<Event> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(?path, error = %e, "read_record: unreadable, skipping");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(?path, error = %e, "read_record: unparseable, skipping");
                None
            }
        }
    }

    fn dir_size(&self) -> u64 {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .filter(|m| m.is_file())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Remove records whose name prefix is older than `cutoff_millis`
    fn remove_older_than(&self, cutoff_millis: i64) -> io::Result<usize> {
        let mut removed = 0;
        for (name, path) in self.list_records()? {
            match Self::name_millis(&name) {
                Some(millis) if millis < cutoff_millis => {
                    if remove_if_exists(&path)? {
                        removed += 1;
                    }
                }
                Some(_) => {}
                None => {
                    // Not one of ours; leave it alone
                    debug!(%name, "remove_older_than: unrecognized record name");
                }
            }
        }
        Ok(removed)
    }

    /// Remove temp files abandoned by crashed writers
    fn remove_orphaned_temps(&self) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(is_hidden(&name) && name.ends_with(".tmp")) {
                continue;
            }
            let old = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > ORPHAN_TEMP_AGE);
            if old && remove_if_exists(&entry.path())? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn cutoff_millis(window: Duration) -> i64 {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(window)
        .map(|t| t.timestamp_millis())
        .unwrap_or(i64::MIN)
}

impl EventStore for FileEventStore {
    fn backend(&self) -> Backend {
        Backend::Files
    }

    fn append(&self, event: &Event) -> StoreResult<()> {
        let mut event = event.clone();
        event.consumed = false;
        event.consumed_at = None;
        truncate_utf8(&mut event.payload, MAX_PAYLOAD_BYTES);

        let name = Self::record_name(&event);
        debug!(%name, "FileEventStore::append: called");
        let json = serde_json::to_vec(&event)?;
        write_atomic(&self.dir.join(name), &json)?;
        Ok(())
    }

    fn drain_unconsumed(&self) -> StoreResult<Vec<Event>> {
        debug!(dir = ?self.dir, "FileEventStore::drain_unconsumed: called");
        let now = Utc::now();
        let mut claimed = Vec::new();

        for (name, path) in self.list_records()? {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(%name, "drain: record vanished before read");
                    continue;
                }
                Err(e) => {
                    debug!(%name, error = %e, "drain: unreadable record, skipping");
                    continue;
                }
            };

            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(%name, "drain: lost claim race");
                    continue;
                }
                Err(e) => {
                    warn!(%name, error = %e, "drain: could not claim record");
                    continue;
                }
            }

            match serde_json::from_slice::<Event>(&bytes) {
                Ok(mut event) => {
                    event.mark_consumed(now);
                    claimed.push(event);
                }
                Err(e) => {
                    debug!(%name, error = %e, "drain: discarding malformed record");
                }
            }
        }

        claimed.sort_by_key(|e| e.timestamp);
        debug!(count = claimed.len(), "FileEventStore::drain_unconsumed: returning");
        Ok(claimed)
    }

    fn recent(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let records = self.list_records()?;
        let events = records
            .iter()
            .rev()
            .filter_map(|(_, path)| Self::read_record(path))
            .take(limit)
            .collect();
        Ok(events)
    }

    fn retain(&self, policy: &RetentionPolicy) -> StoreResult<RetentionReport> {
        debug!(?policy, "FileEventStore::retain: called");
        let mut report = RetentionReport {
            events_removed: self.remove_older_than(cutoff_millis(policy.max_age))?,
            temp_files_removed: self.remove_orphaned_temps()?,
            ..Default::default()
        };

        let size = self.dir_size();
        if size > policy.max_size_bytes {
            warn!(
                size,
                max = policy.max_size_bytes,
                "Event directory over size ceiling, pruning aggressively"
            );
            report.events_removed += self.remove_older_than(cutoff_millis(policy.aggressive_window))?;
            report.compacted = true;
        }

        if !report.is_empty() {
            info!(?report, "Event directory retention complete");
        }
        Ok(report)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let pending = self.list_records()?.len();
        Ok(StoreStats {
            backend: Backend::Files,
            pending,
            total: pending,
            size_bytes: self.dir_size(),
        })
    }

    fn supports_notification(&self) -> bool {
        true
    }

    fn watch_path(&self) -> Option<PathBuf> {
        Some(self.dir.clone())
    }
}
