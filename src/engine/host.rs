//! Module host — everything a module sees of the engine
//!
//! Each module gets its own host carrying the module's name, its dedup
//! state, and a handle to the shared scan context (queue, arena, aggregator,
//! repository, HTTP, DNS, cancellation). `notify_listeners` is the sole path
//! by which new events enter the scan queue.

use super::arena::EventArena;
use super::EngineError;
use crate::aggregator::ResultAggregator;
use crate::config::{defaults, ScanConfig};
use crate::net::{DnsClient, FetchOptions, FetchResponse, HttpClient, TransportError};
use crate::queue::{Priority, ScanQueue};
use crate::storage::ScanRepository;
use crate::types::{Event, EventDraft, Target};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Shared per-scan state, one instance per scan.
pub struct ScanContext {
    pub scan_id: String,
    pub target: Arc<Target>,
    pub config: ScanConfig,
    pub queue: Arc<ScanQueue<Arc<Event>>>,
    pub arena: Arc<EventArena>,
    pub aggregator: Arc<ResultAggregator>,
    pub repository: Arc<dyn ScanRepository>,
    pub http: Arc<HttpClient>,
    pub dns: Arc<DnsClient>,
    pub cancel: CancellationToken,
    /// Shared scan-scoped cache behind `cache_get`/`cache_put`.
    cache: Mutex<HashMap<String, (String, Instant)>>,
    pub events_emitted: AtomicU64,
    pub queue_rejected: AtomicU64,
    pub storage_errors: AtomicU64,
}

impl ScanContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scan_id: String,
        target: Arc<Target>,
        config: ScanConfig,
        queue: Arc<ScanQueue<Arc<Event>>>,
        arena: Arc<EventArena>,
        aggregator: Arc<ResultAggregator>,
        repository: Arc<dyn ScanRepository>,
        http: Arc<HttpClient>,
        dns: Arc<DnsClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scan_id,
            target,
            config,
            queue,
            arena,
            aggregator,
            repository,
            http,
            dns,
            cancel,
            cache: Mutex::new(HashMap::new()),
            events_emitted: AtomicU64::new(0),
            queue_rejected: AtomicU64::new(0),
            storage_errors: AtomicU64::new(0),
        }
    }
}

/// The API a module sees from the core.
pub struct ModuleHost {
    module_name: String,
    ctx: Arc<ScanContext>,
    /// Per-module fingerprint dedup for deliveries.
    seen: Mutex<HashSet<String>>,
    /// Per-module bounded value dedup exposed as temp storage.
    temp: Mutex<HashSet<String>>,
}

impl ModuleHost {
    pub fn new(module_name: String, ctx: Arc<ScanContext>) -> Self {
        Self {
            module_name,
            ctx,
            seen: Mutex::new(HashSet::new()),
            temp: Mutex::new(HashSet::new()),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn scan_id(&self) -> &str {
        &self.ctx.scan_id
    }

    pub fn config(&self) -> &ScanConfig {
        &self.ctx.config
    }

    /// The shared scan target, for scope checks.
    pub fn get_target(&self) -> Arc<Target> {
        Arc::clone(&self.ctx.target)
    }

    /// True when the scan-wide stop flag is set. Modules must poll this at
    /// cooperative points inside long-running work.
    pub fn check_for_stop(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    /// Fetch a URL through the shared, rate-limited HTTP client.
    pub async fn fetch_url(&self, url: &str, opts: FetchOptions) -> Result<FetchResponse, TransportError> {
        self.ctx.http.fetch(url, opts).await
    }

    /// Resolve a hostname to IPv4 addresses.
    pub async fn resolve_host(&self, name: &str) -> Result<Vec<String>, TransportError> {
        self.ctx.dns.resolve_host(name).await
    }

    /// Resolve a hostname to IPv6 addresses.
    pub async fn resolve_host6(&self, name: &str) -> Result<Vec<String>, TransportError> {
        self.ctx.dns.resolve_host6(name).await
    }

    /// Reverse-resolve an address to hostnames.
    pub async fn reverse_resolve(&self, addr: &str) -> Result<Vec<String>, TransportError> {
        self.ctx.dns.reverse_resolve(addr).await
    }

    /// Per-module dedup set. Returns true the first time a value is stored;
    /// false when already present or the bound is reached.
    pub fn temp_store(&self, value: &str) -> bool {
        let Ok(mut temp) = self.temp.lock() else { return false };
        if temp.len() >= defaults::TEMP_STORAGE_LIMIT {
            return false;
        }
        temp.insert(value.to_string())
    }

    /// Read a scan-scoped cache entry no older than `max_age`.
    pub fn cache_get(&self, key: &str, max_age: Duration) -> Option<String> {
        let cache = self.ctx.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|(_, stored)| stored.elapsed() <= max_age)
            .map(|(value, _)| value.clone())
    }

    /// Store a scan-scoped cache entry.
    pub fn cache_put(&self, key: &str, value: &str) {
        if let Ok(mut cache) = self.ctx.cache.lock() {
            cache.insert(key.to_string(), (value.to_string(), Instant::now()));
        }
    }

    /// Emit a new event: the sole path into the scan queue.
    ///
    /// The draft must carry a source event (set via `EventDraft::source`).
    /// The event is registered in the arena, observed by the aggregator,
    /// appended to the repository best-effort, and enqueued at NORMAL
    /// priority. A put the queue will not take (closed during shutdown, or
    /// full past its policy) counts the event as rejected and drops it.
    pub async fn notify_listeners(&self, mut draft: EventDraft) -> Result<Arc<Event>, EngineError> {
        draft.module = self.module_name.clone();
        let event = self.ctx.arena.register(draft)?;

        self.ctx.aggregator.add_event(
            event.event_type(),
            event.data(),
            event.module(),
            event.confidence(),
            event.risk(),
            event.generated_at(),
        );

        if let Err(error) = self.ctx.repository.append_event(&self.ctx.scan_id, &event) {
            self.ctx.storage_errors.fetch_add(1, Ordering::Relaxed);
            warn!(scan_id = %self.ctx.scan_id, error = %error, "Event persistence failed");
        }

        self.ctx.events_emitted.fetch_add(1, Ordering::Relaxed);
        if self.ctx.queue.put(Arc::clone(&event), Priority::Normal).await {
            Ok(event)
        } else {
            self.ctx.queue_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                module = %self.module_name,
                event_type = event.event_type(),
                "Queue rejected emitted event — dropped"
            );
            Err(EngineError::QueueRejected)
        }
    }

    /// Fingerprint dedup for deliveries to this module. True on first sight.
    pub(crate) fn mark_seen(&self, fingerprint: &str) -> bool {
        let Ok(mut seen) = self.seen.lock() else { return true };
        seen.insert(fingerprint.to_string())
    }
}
