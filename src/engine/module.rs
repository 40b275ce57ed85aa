//! ScanModule trait — the contract a reconnaissance module implements
//!
//! A module declares which event types it watches and produces, receives a
//! host object at setup, and handles one event at a time. The engine
//! guarantees at most one `handle_event` per module instance runs at any
//! moment, so module state needs no internal locking.

use super::host::ModuleHost;
use super::EngineError;
use crate::config::ScanConfig;
use crate::net::TransportError;
use crate::types::{Event, Target};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure inside a module. Local: it never propagates past the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("emit failed: {0}")]
    Emit(String),
    #[error("{0}")]
    Other(String),
}

impl From<EngineError> for ModuleError {
    fn from(err: EngineError) -> Self {
        Self::Emit(err.to_string())
    }
}

/// A pluggable reconnaissance module.
#[async_trait]
pub trait ScanModule: Send {
    /// Unique module name, e.g. `htm_dns`.
    fn name(&self) -> &str;

    /// Event types this module wants delivered. `*` means every type.
    fn watched_events(&self) -> Vec<String>;

    /// Event types this module can emit.
    fn produced_events(&self) -> Vec<String>;

    /// Called once before the scan starts. The host is the module's only
    /// window into the engine: fetching, resolving, caching, and emitting.
    fn setup(&mut self, host: Arc<ModuleHost>, config: &ScanConfig) -> Result<(), ModuleError>;

    /// Called once after `setup` with the shared scan target.
    fn set_target(&mut self, target: Arc<Target>);

    /// Handle one delivered event. Long-running work should be chunked and
    /// must poll `host.check_for_stop()` at cooperative points.
    async fn handle_event(&mut self, event: &Event) -> Result<(), ModuleError>;
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Suppressed by the per-module fingerprint dedup.
    Duplicate,
    /// Module is in errored state; delivery skipped.
    SkippedErrored,
    /// Module returned an error; it is now errored.
    Failed,
}

/// Engine-side wrapper around a module instance.
///
/// Owns the per-module serialisation lock, the errored flag, and delivery
/// counters. Fingerprint dedup lives in the host so that it applies to every
/// delivery path uniformly.
pub struct ModuleEntry {
    name: String,
    module: tokio::sync::Mutex<Box<dyn ScanModule>>,
    host: Arc<ModuleHost>,
    errored: AtomicBool,
    events_handled: AtomicU64,
    duplicates: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
}

impl ModuleEntry {
    pub fn new(name: String, module: Box<dyn ScanModule>, host: Arc<ModuleHost>) -> Self {
        Self {
            name,
            module: tokio::sync::Mutex::new(module),
            host,
            errored: AtomicBool::new(false),
            events_handled: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &Arc<ModuleHost> {
        &self.host
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled.load(Ordering::Relaxed)
    }

    pub fn duplicates_suppressed(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Deliver one event to the module.
    ///
    /// Applies the errored-state check and the per-module fingerprint dedup
    /// before invoking module logic. An error from `handle_event` counts the
    /// event as delivered, marks the module errored, and suppresses all
    /// further deliveries to it.
    pub async fn deliver(&self, event: &Event) -> DeliveryOutcome {
        if self.is_errored() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return DeliveryOutcome::SkippedErrored;
        }
        if !self.host.mark_seen(&event.fingerprint()) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(
                module = %self.name,
                event_type = event.event_type(),
                "Duplicate suppressed"
            );
            return DeliveryOutcome::Duplicate;
        }

        // Per-module serialisation: at most one handle_event at a time
        let mut module = self.module.lock().await;
        match module.handle_event(event).await {
            Ok(()) => {
                self.events_handled.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Delivered
            }
            Err(error) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.errored.store(true, Ordering::Release);
                warn!(
                    module = %self.name,
                    event_type = event.event_type(),
                    error = %error,
                    "Module failed handling event — marking errored"
                );
                DeliveryOutcome::Failed
            }
        }
    }
}
