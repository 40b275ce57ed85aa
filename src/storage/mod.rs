//! ScanRepository trait — pluggable scan persistence
//!
//! Abstracts scan and event persistence so different backends can be swapped
//! without touching engine code:
//! - `InMemoryRepository`: in-memory store for testing and minimal deployments
//! - `SledRepository`: durable embedded store
//!
//! `append_event` is best-effort from the engine's point of view: failures
//! are logged and counted, never allowed to stall dispatch.

mod memory;
mod sled_store;

pub use memory::InMemoryRepository;
pub use sled_store::SledRepository;

use crate::engine::ScanStatus;
use crate::types::Event;
use serde::{Deserialize, Serialize};

/// Stored metadata about a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: String,
    pub name: String,
    pub target: String,
    pub status: ScanStatus,
    pub started: Option<i64>,
    pub ended: Option<i64>,
}

/// Trait for pluggable scan persistence backends.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across worker tasks.
pub trait ScanRepository: Send + Sync {
    /// Register a new scan.
    fn create_scan(&self, scan_id: &str, name: &str, target: &str) -> Result<(), StorageError>;

    /// Update scan lifecycle state and timestamps (unix millis).
    fn set_scan_status(
        &self,
        scan_id: &str,
        status: ScanStatus,
        started: Option<i64>,
        ended: Option<i64>,
    ) -> Result<(), StorageError>;

    /// Append one produced event. May batch internally.
    fn append_event(&self, scan_id: &str, event: &Event) -> Result<(), StorageError>;

    /// Read back events, optionally restricted to one event type.
    fn read_events(&self, scan_id: &str, type_filter: Option<&str>) -> Result<Vec<Event>, StorageError>;

    /// Fetch scan metadata.
    fn get_scan(&self, scan_id: &str) -> Result<Option<ScanRecord>, StorageError>;

    /// Remove a scan and all of its events.
    fn delete_scan(&self, scan_id: &str) -> Result<(), StorageError>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unknown scan: {0}")]
    UnknownScan(String),
}
