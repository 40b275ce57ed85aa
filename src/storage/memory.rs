//! In-memory scan repository for testing and minimal deployments
//!
//! Thread-safe via `RwLock`. Not durable — data lost on restart. Satisfies
//! the `ScanRepository` contract exactly, so the engine behaves identically
//! against it and the durable backend.

use super::{ScanRecord, ScanRepository, StorageError};
use crate::engine::ScanStatus;
use crate::types::Event;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryRepository {
    scans: RwLock<HashMap<String, ScanRecord>>,
    events: RwLock<HashMap<String, Vec<Event>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored events across all scans.
    pub fn event_count(&self) -> usize {
        self.events.read().map(|e| e.values().map(Vec::len).sum()).unwrap_or(0)
    }
}

impl ScanRepository for InMemoryRepository {
    fn create_scan(&self, scan_id: &str, name: &str, target: &str) -> Result<(), StorageError> {
        let mut scans = self.scans.write().map_err(|e| StorageError::Storage(e.to_string()))?;
        scans.insert(
            scan_id.to_string(),
            ScanRecord {
                scan_id: scan_id.to_string(),
                name: name.to_string(),
                target: target.to_string(),
                status: ScanStatus::Created,
                started: None,
                ended: None,
            },
        );
        Ok(())
    }

    fn set_scan_status(
        &self,
        scan_id: &str,
        status: ScanStatus,
        started: Option<i64>,
        ended: Option<i64>,
    ) -> Result<(), StorageError> {
        let mut scans = self.scans.write().map_err(|e| StorageError::Storage(e.to_string()))?;
        let record = scans
            .get_mut(scan_id)
            .ok_or_else(|| StorageError::UnknownScan(scan_id.to_string()))?;
        record.status = status;
        if started.is_some() {
            record.started = started;
        }
        if ended.is_some() {
            record.ended = ended;
        }
        Ok(())
    }

    fn append_event(&self, scan_id: &str, event: &Event) -> Result<(), StorageError> {
        let mut events = self.events.write().map_err(|e| StorageError::Storage(e.to_string()))?;
        events.entry(scan_id.to_string()).or_default().push(event.clone());
        Ok(())
    }

    fn read_events(&self, scan_id: &str, type_filter: Option<&str>) -> Result<Vec<Event>, StorageError> {
        let events = self.events.read().map_err(|e| StorageError::Storage(e.to_string()))?;
        let all = events.get(scan_id).cloned().unwrap_or_default();
        Ok(match type_filter {
            Some(filter) => all.into_iter().filter(|e| e.event_type() == filter).collect(),
            None => all,
        })
    }

    fn get_scan(&self, scan_id: &str) -> Result<Option<ScanRecord>, StorageError> {
        let scans = self.scans.read().map_err(|e| StorageError::Storage(e.to_string()))?;
        Ok(scans.get(scan_id).cloned())
    }

    fn delete_scan(&self, scan_id: &str) -> Result<(), StorageError> {
        let mut scans = self.scans.write().map_err(|e| StorageError::Storage(e.to_string()))?;
        let mut events = self.events.write().map_err(|e| StorageError::Storage(e.to_string()))?;
        scans.remove(scan_id);
        events.remove(scan_id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
