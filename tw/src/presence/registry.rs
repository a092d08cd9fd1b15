//! PresenceRegistry - aggregate view over every participant's record

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use eventstore::atomic::{is_hidden, remove_if_exists};
use tracing::{debug, info, warn};

use super::liveness::{Liveness, probe};
use super::record::{PresenceRecord, PresenceStatus};

/// One difference between two scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Joined(PresenceRecord),
    Departed(PresenceRecord),
    StatusChanged {
        record: PresenceRecord,
        from: PresenceStatus,
        to: PresenceStatus,
    },
}

/// Scanner over the presence directory
///
/// The snapshot only exists to diff successive scans; every question about
/// current state is answered by the most recent scan.
#[derive(Debug)]
pub struct PresenceRegistry {
    dir: PathBuf,
    snapshot: HashMap<String, PresenceRecord>,
}

impl PresenceRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(?dir, error = %e, "Failed to create presence directory");
        }
        Self {
            dir,
            snapshot: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read every record, prune the dead, and report what changed
    pub fn scan(&mut self) -> Vec<PresenceChange> {
        let (live, _) = self.read_live();
        let current: HashMap<String, PresenceRecord> = live
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let mut changes = Vec::new();
        for (id, record) in &current {
            match self.snapshot.get(id) {
                None => changes.push(PresenceChange::Joined(record.clone())),
                Some(previous) if previous.status != record.status => changes.push(PresenceChange::StatusChanged {
                    record: record.clone(),
                    from: previous.status,
                    to: record.status,
                }),
                Some(_) => {}
            }
        }
        for (id, previous) in &self.snapshot {
            if !current.contains_key(id) {
                changes.push(PresenceChange::Departed(previous.clone()));
            }
        }

        if !changes.is_empty() {
            debug!(count = changes.len(), "PresenceRegistry::scan: changes detected");
        }
        self.snapshot = current;
        changes
    }

    /// At least one live participant is working, as of the last scan
    pub fn is_busy(&self) -> bool {
        self.snapshot.values().any(PresenceRecord::is_working)
    }

    /// Live participants as of the last scan, oldest first
    pub fn participants(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<_> = self.snapshot.values().cloned().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Remove records whose process no longer exists
    ///
    /// The snapshot is left alone, so the next scan reports them departed.
    pub fn prune_dead(&self) -> usize {
        self.read_live().1
    }

    /// Records whose process is alive (or cannot be ruled out), and how
    /// many dead ones this call removed
    fn read_live(&self) -> (Vec<PresenceRecord>, usize) {
        let mut live = Vec::new();
        let mut pruned = 0;
        for (path, record) in self.read_all() {
            if probe(record.pid) == Liveness::Dead {
                match remove_if_exists(&path) {
                    Ok(true) => {
                        info!(id = %record.id, pid = record.pid, "Pruned presence record of dead process");
                        pruned += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(?path, error = %e, "Failed to prune presence record"),
                }
                continue;
            }
            live.push(record);
        }
        (live, pruned)
    }

    fn read_all(&self) -> Vec<(PathBuf, PresenceRecord)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(dir = ?self.dir, error = %e, "Failed to list presence directory");
                }
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&name) || !name.ends_with(".json") {
                continue;
            }
            let path = entry.path();
            let content = match fs::read(&path) {
                Ok(content) => content,
                Err(e) => {
                    debug!(?path, error = %e, "read_all: record vanished or unreadable");
                    continue;
                }
            };
            match serde_json::from_slice::<PresenceRecord>(&content) {
                Ok(record) => records.push((path, record)),
                Err(e) => debug!(?path, error = %e, "read_all: skipping unparseable record"),
            }
        }
        records
    }
}
