//! Participant - this process's own presence record

use std::path::{Path, PathBuf};

use chrono::Utc;
use eventstore::atomic::{remove_if_exists, write_atomic};
use eventstore::{Event, EventKind, EventQueue};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::PresenceError;
use super::record::{PresenceRecord, PresenceStatus};

/// A registered participant
///
/// Dropping a participant that was not deregistered removes its record and
/// emits the stop event, same as `deregister`.
#[derive(Debug)]
pub struct Participant {
    dir: PathBuf,
    record: PresenceRecord,
    queue: EventQueue,
    registered: bool,
}

impl Participant {
    /// Write an idle record for this process and announce it
    pub fn register(dir: impl Into<PathBuf>, queue: EventQueue) -> Result<Self, PresenceError> {
        let id = Uuid::now_v7().to_string();
        Self::register_as(dir, id, std::process::id(), queue)
    }

    /// `register` with an explicit id and pid
    pub fn register_as(
        dir: impl Into<PathBuf>,
        id: impl Into<String>,
        pid: u32,
        queue: EventQueue,
    ) -> Result<Self, PresenceError> {
        let dir = dir.into();
        let record = PresenceRecord::new(id, pid);
        debug!(id = %record.id, pid, ?dir, "Participant::register_as: called");

        let mut participant = Self {
            dir,
            record,
            queue,
            registered: false,
        };
        participant.write()?;
        participant.registered = true;
        participant.announce(EventKind::AgentStart);
        info!(id = %participant.record.id, pid, "Participant registered");
        Ok(participant)
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &PresenceRecord {
        &self.record
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Mark this participant as doing mutating work
    pub fn begin_work(&mut self) -> Result<(), PresenceError> {
        debug!(id = %self.record.id, "Participant::begin_work: called");
        self.set_status(PresenceStatus::Working)
    }

    /// Mark this participant idle again
    pub fn end_work(&mut self) -> Result<(), PresenceError> {
        debug!(id = %self.record.id, "Participant::end_work: called");
        self.set_status(PresenceStatus::Idle)
    }

    /// Remove the record and announce the departure
    pub fn deregister(mut self) -> Result<(), PresenceError> {
        debug!(id = %self.record.id, "Participant::deregister: called");
        self.registered = false;
        remove_if_exists(&self.record.path_in(&self.dir))?;
        self.announce(EventKind::AgentStop);
        info!(id = %self.record.id, "Participant deregistered");
        Ok(())
    }

    fn set_status(&mut self, status: PresenceStatus) -> Result<(), PresenceError> {
        self.record.status = status;
        self.record.last_activity = Utc::now();
        self.write()
    }

    fn write(&self) -> Result<(), PresenceError> {
        let json = serde_json::to_vec_pretty(&self.record)?;
        write_atomic(&self.record.path_in(&self.dir), &json)?;
        Ok(())
    }

    fn announce(&self, kind: EventKind) {
        let payload = json!({
            "id": self.record.id,
            "pid": self.record.pid,
        });
        self.queue
            .emit(Event::new(kind, self.record.id.clone(), payload.to_string()));
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        if !self.registered {
            return;
        }
        if let Err(e) = remove_if_exists(&self.record.path_in(&self.dir)) {
            warn!(id = %self.record.id, error = %e, "Failed to remove presence record on drop");
        }
        self.announce(EventKind::AgentStop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstore::StoreConfig;
    use tempfile::TempDir;

    fn read_record(participant: &Participant) -> PresenceRecord {
        let path = participant.record().path_in(participant.dir());
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_lifecycle_writes_record_and_events() {
        let temp = TempDir::new().unwrap();
        let queue = EventQueue::open(&StoreConfig::default(), temp.path());
        let dir = temp.path().join("presence");

        let mut participant = Participant::register(&dir, queue.clone()).unwrap();
        let on_disk = read_record(&participant);
        assert_eq!(on_disk.status, PresenceStatus::Idle);
        assert_eq!(on_disk.pid, std::process::id());

        participant.begin_work().unwrap();
        let working = read_record(&participant);
        assert!(working.is_working());
        assert!(working.last_activity >= on_disk.last_activity);

        participant.end_work().unwrap();
        assert_eq!(read_record(&participant).status, PresenceStatus::Idle);

        let path = participant.record().path_in(&dir);
        participant.deregister().unwrap();
        assert!(!path.exists());

        let kinds: Vec<_> = queue.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::AgentStart, EventKind::AgentStop]);
    }

    #[test]
    fn test_drop_cleans_up() {
        let temp = TempDir::new().unwrap();
        let queue = EventQueue::open(&StoreConfig::default(), temp.path());
        let dir = temp.path().join("presence");

        let participant = Participant::register_as(&dir, "agent-x", std::process::id(), queue.clone()).unwrap();
        let path = participant.record().path_in(&dir);
        assert!(path.exists());
        drop(participant);

        assert!(!path.exists());
        assert_eq!(queue.drain().len(), 2);
    }

    #[test]
    fn test_works_without_store() {
        let temp = TempDir::new().unwrap();
        let participant = Participant::register(temp.path(), EventQueue::unavailable()).unwrap();
        assert!(participant.record().path_in(temp.path()).exists());
        participant.deregister().unwrap();
    }
}
