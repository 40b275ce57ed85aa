//! Sled-backed scan repository
//!
//! Durable embedded store. Scan records live in the `scans` tree keyed by
//! scan id; each scan's events live in their own tree keyed by event id in
//! big-endian so iteration returns emission order.

use super::{ScanRecord, ScanRepository, StorageError};
use crate::engine::ScanStatus;
use crate::types::Event;
use std::path::Path;
use tracing::debug;

pub struct SledRepository {
    db: sled::Db,
}

impl SledRepository {
    /// Open or create a repository at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::Storage(e.to_string()))?;
        debug!("Sled scan repository opened");
        Ok(Self { db })
    }

    fn scans_tree(&self) -> Result<sled::Tree, StorageError> {
        self.db.open_tree("scans").map_err(|e| StorageError::Storage(e.to_string()))
    }

    fn events_tree(&self, scan_id: &str) -> Result<sled::Tree, StorageError> {
        self.db
            .open_tree(format!("events/{scan_id}"))
            .map_err(|e| StorageError::Storage(e.to_string()))
    }
}

impl ScanRepository for SledRepository {
    fn create_scan(&self, scan_id: &str, name: &str, target: &str) -> Result<(), StorageError> {
        let record = ScanRecord {
            scan_id: scan_id.to_string(),
            name: name.to_string(),
            target: target.to_string(),
            status: ScanStatus::Created,
            started: None,
            ended: None,
        };
        let value = serde_json::to_vec(&record).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.scans_tree()?
            .insert(scan_id.as_bytes(), value)
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(())
    }

    fn set_scan_status(
        &self,
        scan_id: &str,
        status: ScanStatus,
        started: Option<i64>,
        ended: Option<i64>,
    ) -> Result<(), StorageError> {
        let tree = self.scans_tree()?;
        let raw = tree
            .get(scan_id.as_bytes())
            .map_err(|e| StorageError::Storage(e.to_string()))?
            .ok_or_else(|| StorageError::UnknownScan(scan_id.to_string()))?;
        let mut record: ScanRecord =
            serde_json::from_slice(&raw).map_err(|e| StorageError::Serialization(e.to_string()))?;
        record.status = status;
        if started.is_some() {
            record.started = started;
        }
        if ended.is_some() {
            record.ended = ended;
        }
        let value = serde_json::to_vec(&record).map_err(|e| StorageError::Serialization(e.to_string()))?;
        tree.insert(scan_id.as_bytes(), value)
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(())
    }

    fn append_event(&self, scan_id: &str, event: &Event) -> Result<(), StorageError> {
        let value = serde_json::to_vec(event).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.events_tree(scan_id)?
            .insert(event.id().to_be_bytes(), value)
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(())
    }

    fn read_events(&self, scan_id: &str, type_filter: Option<&str>) -> Result<Vec<Event>, StorageError> {
        let tree = self.events_tree(scan_id)?;
        let mut events = Vec::new();
        for entry in tree.iter() {
            let (_, raw) = entry.map_err(|e| StorageError::Storage(e.to_string()))?;
            let event: Event =
                serde_json::from_slice(&raw).map_err(|e| StorageError::Serialization(e.to_string()))?;
            if type_filter.map_or(true, |f| event.event_type() == f) {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn get_scan(&self, scan_id: &str) -> Result<Option<ScanRecord>, StorageError> {
        let raw = self
            .scans_tree()?
            .get(scan_id.as_bytes())
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw).map_err(|e| StorageError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn delete_scan(&self, scan_id: &str) -> Result<(), StorageError> {
        self.scans_tree()?
            .remove(scan_id.as_bytes())
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        self.db
            .drop_tree(format!("events/{scan_id}"))
            .map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventDraft;

    fn make_event(id: u64, event_type: &str, data: &str) -> Event {
        Event::from_draft(
            id,
            1_700_000_000_000 + id as i64,
            EventDraft::new(event_type, data).module("test").source_id(id.saturating_sub(1)),
        )
    }

    #[test]
    fn events_round_trip_structurally() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(tmp.path().join("db")).unwrap();
        repo.create_scan("scan-1", "nightly", "example.com").unwrap();

        let events: Vec<Event> = (1..=5).map(|n| make_event(n, "IP_ADDRESS", &format!("10.0.0.{n}"))).collect();
        for event in &events {
            repo.append_event("scan-1", event).unwrap();
        }

        let back = repo.read_events("scan-1", None).unwrap();
        assert_eq!(back, events);
    }

    #[test]
    fn emission_order_preserved() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(tmp.path().join("db")).unwrap();
        for n in [3u64, 1, 2] {
            repo.append_event("scan-1", &make_event(n, "IP_ADDRESS", &format!("10.0.0.{n}"))).unwrap();
        }
        let back = repo.read_events("scan-1", None).unwrap();
        let ids: Vec<u64> = back.iter().map(Event::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db");
        {
            let repo = SledRepository::open(&path).unwrap();
            repo.create_scan("scan-1", "nightly", "example.com").unwrap();
            repo.set_scan_status("scan-1", ScanStatus::Finished, Some(1), Some(2)).unwrap();
            repo.append_event("scan-1", &make_event(1, "IP_ADDRESS", "1.2.3.4")).unwrap();
        }
        {
            let repo = SledRepository::open(&path).unwrap();
            let record = repo.get_scan("scan-1").unwrap().unwrap();
            assert_eq!(record.status, ScanStatus::Finished);
            assert_eq!(repo.read_events("scan-1", None).unwrap().len(), 1);
        }
    }

    #[test]
    fn delete_scan_drops_events() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(tmp.path().join("db")).unwrap();
        repo.create_scan("scan-1", "n", "t").unwrap();
        repo.append_event("scan-1", &make_event(1, "IP_ADDRESS", "1.2.3.4")).unwrap();
        repo.delete_scan("scan-1").unwrap();
        assert!(repo.get_scan("scan-1").unwrap().is_none());
        assert!(repo.read_events("scan-1", None).unwrap().is_empty());
    }
}
