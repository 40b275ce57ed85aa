//! Dispatch engine — module lifecycle, fan-out, and scan control
//!
//! A scan owns a resolver plan, a queue, an event arena, and a set of module
//! instances. The engine seeds a single ROOT event, then a pool of workers
//! dequeues events, runs the enrichment pipeline, and delivers each event to
//! every subscriber in registration order (wildcard subscribers last). Any
//! event a module emits re-enters the queue with its lineage set.
//!
//! Ordering guarantees: per-priority FIFO in the queue, at most one
//! `handle_event` per module at a time, and nothing more — modules must not
//! depend on cross-module ordering.

mod arena;
mod host;
mod module;

pub use arena::EventArena;
pub use host::{ModuleHost, ScanContext};
pub use module::{DeliveryOutcome, ModuleEntry, ModuleError, ScanModule};

use crate::aggregator::ResultAggregator;
use crate::config::{defaults, ScanConfig};
use crate::enrichment::{EnrichmentContext, EnrichmentPipeline};
use crate::net::{DnsClient, HttpClient, RateLimitConfig, SlidingWindowLimiter, TransportError};
use crate::queue::{BackpressureAction, Priority, QueueConfig, QueueStats, ScanQueue};
use crate::resolver::{ResolutionResult, ResolveStatus};
use crate::storage::{ScanRepository, StorageError};
use crate::types::{Event, EventDraft, Target, TargetError, WILDCARD_EVENT};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scan lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub enum ScanStatus {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "ABORTED")]
    Aborted,
    #[serde(rename = "ERROR-FAILED")]
    ErrorFailed,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Aborted => "ABORTED",
            Self::ErrorFailed => "ERROR-FAILED",
        };
        write!(f, "{label}")
    }
}

/// Engine-level failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),
    #[error("unsatisfied module dependencies: {0:?}")]
    ResolverUnsatisfied(BTreeMap<String, Vec<String>>),
    #[error("circular module dependencies: {0:?}")]
    ResolverCircular(Vec<Vec<String>>),
    #[error("event lineage violation: {0}")]
    Lineage(String),
    #[error("queue rejected event")]
    QueueRejected,
    #[error("module setup failed: {module}: {reason}")]
    Setup { module: String, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("fatal engine error: {0}")]
    Fatal(String),
}

/// Counters describing a finished (or aborted) scan.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub events_dispatched: u64,
    pub deliveries: u64,
    pub duplicates_suppressed: u64,
    pub module_errors: u64,
    pub skipped_errored: u64,
    pub events_emitted: u64,
    pub queue_rejected: u64,
    pub storage_errors: u64,
}

/// Per-module delivery report.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub name: String,
    pub events_handled: u64,
    pub duplicates_suppressed: u64,
    pub errors: u64,
    pub errored: bool,
}

/// Result of a scan run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_id: String,
    pub status: ScanStatus,
    pub stats: EngineStats,
    pub queue: QueueStats,
}

struct EngineShared {
    ctx: Arc<ScanContext>,
    modules: Vec<Arc<ModuleEntry>>,
    /// event type → subscriber indices, in registration order
    subscriptions: HashMap<String, Vec<usize>>,
    /// indices of `*` subscribers, invoked after type-specific ones
    star_subscribers: Vec<usize>,
    enrichment: EnrichmentPipeline,
    busy: AtomicUsize,
    dispatched: AtomicU64,
    deliveries: AtomicU64,
    duplicates: AtomicU64,
    module_errors: AtomicU64,
    skipped_errored: AtomicU64,
}

impl EngineShared {
    async fn process_event(&self, event: &Arc<Event>) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        // Enrichers annotate context state; event type and data stay fixed.
        let mut enrichment_ctx =
            EnrichmentContext::new(event.event_type(), event.data(), event.module());
        self.enrichment.process(&mut enrichment_ctx);
        if !enrichment_ctx.tags.is_empty() {
            debug!(
                event_type = event.event_type(),
                tags = ?enrichment_ctx.tags,
                "Event enriched"
            );
        }

        let mut targets: Vec<usize> = self
            .subscriptions
            .get(event.event_type())
            .cloned()
            .unwrap_or_default();
        for idx in &self.star_subscribers {
            if !targets.contains(idx) {
                targets.push(*idx);
            }
        }

        for idx in targets {
            if self.ctx.cancel.is_cancelled() {
                break;
            }
            match self.modules[idx].deliver(event).await {
                DeliveryOutcome::Delivered => {
                    self.deliveries.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryOutcome::Duplicate => {
                    self.duplicates.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryOutcome::SkippedErrored => {
                    self.skipped_errored.fetch_add(1, Ordering::Relaxed);
                }
                DeliveryOutcome::Failed => {
                    self.module_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    async fn worker_loop(&self, worker_id: usize) {
        let poll = Duration::from_millis(defaults::WORKER_POLL_MS);
        loop {
            if self.ctx.cancel.is_cancelled() {
                debug!(worker = worker_id, "Worker observed stop flag — draining");
                break;
            }
            match self.ctx.queue.get(Some(poll)).await {
                Some(item) => {
                    self.busy.fetch_add(1, Ordering::SeqCst);
                    self.process_event(&item.payload).await;
                    self.busy.fetch_sub(1, Ordering::SeqCst);
                }
                None => {
                    if self.ctx.cancel.is_cancelled() {
                        break;
                    }
                    // Children are enqueued before a worker's busy count
                    // drops, so empty-and-idle means the scan is drained.
                    if self.ctx.queue.is_empty() && self.busy.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                }
            }
        }
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            events_dispatched: self.dispatched.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates.load(Ordering::Relaxed),
            module_errors: self.module_errors.load(Ordering::Relaxed),
            skipped_errored: self.skipped_errored.load(Ordering::Relaxed),
            events_emitted: self.ctx.events_emitted.load(Ordering::Relaxed),
            queue_rejected: self.ctx.queue_rejected.load(Ordering::Relaxed),
            storage_errors: self.ctx.storage_errors.load(Ordering::Relaxed),
        }
    }
}

/// Validate a seed value and a resolver plan before starting a scan.
///
/// Structural failures (invalid target, unsatisfied or circular module
/// dependencies) surface here, before any worker starts.
pub fn preflight(target_value: &str, plan: &ResolutionResult) -> Result<Target, EngineError> {
    let target = Target::parse(target_value)?;
    match plan.status {
        ResolveStatus::Ok => Ok(target),
        ResolveStatus::MissingDeps => Err(EngineError::ResolverUnsatisfied(plan.missing_events.clone())),
        ResolveStatus::Circular => Err(EngineError::ResolverCircular(plan.circular_chains.clone())),
    }
}

/// The dispatch engine for one scan.
pub struct ScanEngine {
    shared: Arc<EngineShared>,
}

impl ScanEngine {
    /// Instantiate the engine for a scan.
    ///
    /// `modules` must arrive in resolver load order; subscription order (and
    /// therefore delivery order) follows it. Each module's `setup` and
    /// `set_target` are called here, before any worker starts.
    pub fn new(
        scan_id: impl Into<String>,
        target: Target,
        config: ScanConfig,
        modules: Vec<Box<dyn ScanModule>>,
        repository: Arc<dyn ScanRepository>,
    ) -> Result<Self, EngineError> {
        Self::with_enrichment(
            scan_id,
            target,
            config,
            modules,
            repository,
            EnrichmentPipeline::default_pipeline(),
        )
    }

    /// Same as [`ScanEngine::new`] with a caller-supplied enrichment chain.
    pub fn with_enrichment(
        scan_id: impl Into<String>,
        target: Target,
        config: ScanConfig,
        modules: Vec<Box<dyn ScanModule>>,
        repository: Arc<dyn ScanRepository>,
        enrichment: EnrichmentPipeline,
    ) -> Result<Self, EngineError> {
        let scan_id = scan_id.into();
        let target = Arc::new(target);

        let limiter = Arc::new(SlidingWindowLimiter::new(RateLimitConfig::default()));
        let http = Arc::new(HttpClient::new(&config, limiter)?);
        let dns = Arc::new(DnsClient::new(&config)?);
        let queue = Arc::new(ScanQueue::new(QueueConfig {
            capacity: config.queue_capacity,
            action: BackpressureAction::Block,
            ..QueueConfig::default()
        }));
        let aggregator = Arc::new(ResultAggregator::new(&scan_id));
        let arena = Arc::new(EventArena::new());
        let cancel = CancellationToken::new();

        let ctx = Arc::new(ScanContext::new(
            scan_id,
            Arc::clone(&target),
            config.clone(),
            queue,
            arena,
            aggregator,
            repository,
            http,
            dns,
            cancel,
        ));

        let mut entries: Vec<Arc<ModuleEntry>> = Vec::with_capacity(modules.len());
        let mut subscriptions: HashMap<String, Vec<usize>> = HashMap::new();
        let mut star_subscribers: Vec<usize> = Vec::new();

        for (idx, mut module) in modules.into_iter().enumerate() {
            let name = module.name().to_string();
            let host = Arc::new(ModuleHost::new(name.clone(), Arc::clone(&ctx)));
            module.setup(Arc::clone(&host), &config).map_err(|e| EngineError::Setup {
                module: name.clone(),
                reason: e.to_string(),
            })?;
            module.set_target(Arc::clone(&target));

            for watched in module.watched_events() {
                if watched == WILDCARD_EVENT {
                    star_subscribers.push(idx);
                } else {
                    subscriptions.entry(watched).or_default().push(idx);
                }
            }
            entries.push(Arc::new(ModuleEntry::new(name, module, host)));
        }

        info!(
            scan_id = %ctx.scan_id,
            modules = entries.len(),
            event_types = subscriptions.len(),
            backend = ctx.repository.backend_name(),
            "Scan engine initialised"
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                ctx,
                modules: entries,
                subscriptions,
                star_subscribers,
                enrichment,
                busy: AtomicUsize::new(0),
                dispatched: AtomicU64::new(0),
                deliveries: AtomicU64::new(0),
                duplicates: AtomicU64::new(0),
                module_errors: AtomicU64::new(0),
                skipped_errored: AtomicU64::new(0),
            }),
        })
    }

    /// Run the scan to completion (or cancellation).
    pub async fn run(&self) -> Result<ScanOutcome, EngineError> {
        let ctx = &self.shared.ctx;
        let started = Utc::now().timestamp_millis();

        ctx.repository.create_scan(&ctx.scan_id, &ctx.scan_id, ctx.target.value())?;
        ctx.repository.set_scan_status(&ctx.scan_id, ScanStatus::Running, Some(started), None)?;

        // Seed the single ROOT event
        let root = ctx.arena.register(EventDraft::root(ctx.target.value()))?;
        if let Err(error) = ctx.repository.append_event(&ctx.scan_id, &root) {
            ctx.storage_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %error, "ROOT event persistence failed");
        }
        if !ctx.queue.put(Arc::clone(&root), Priority::Normal).await {
            return Err(EngineError::Fatal("could not enqueue ROOT event".to_string()));
        }

        // Wall-clock budget watchdog
        let watchdog = if ctx.config.scan_timeout_secs > 0 {
            let cancel = ctx.cancel.clone();
            let budget = Duration::from_secs(ctx.config.scan_timeout_secs);
            let scan_id = ctx.scan_id.clone();
            Some(tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(budget) => {
                        warn!(scan_id = %scan_id, budget_secs = budget.as_secs(), "Scan wall-clock budget exceeded — stopping");
                        cancel.cancel();
                    }
                }
            }))
        } else {
            None
        };

        // Sentinel wake-up: closing the queue on stop unblocks any producer
        // or consumer waiting inside it.
        let closer = {
            let cancel = ctx.cancel.clone();
            let queue = Arc::clone(&ctx.queue);
            tokio::spawn(async move {
                cancel.cancelled().await;
                queue.close();
            })
        };

        let workers = ctx.config.worker_count();
        info!(scan_id = %ctx.scan_id, workers = workers, "Scan started");

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let shared = Arc::clone(&self.shared);
            pool.spawn(async move { shared.worker_loop(worker_id).await });
        }

        let mut worker_panicked = false;
        while let Some(result) = pool.join_next().await {
            if let Err(error) = result {
                worker_panicked = true;
                warn!(error = %error, "Worker task failed");
                // One broken worker must not hang the scan
                ctx.cancel.cancel();
            }
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        closer.abort();
        ctx.queue.close();

        let status = if worker_panicked {
            ScanStatus::ErrorFailed
        } else if ctx.cancel.is_cancelled() {
            ScanStatus::Aborted
        } else {
            ScanStatus::Finished
        };
        let ended = Utc::now().timestamp_millis();
        ctx.repository.set_scan_status(&ctx.scan_id, status, None, Some(ended))?;

        let stats = self.shared.stats();
        info!(
            scan_id = %ctx.scan_id,
            status = %status,
            dispatched = stats.events_dispatched,
            deliveries = stats.deliveries,
            duplicates = stats.duplicates_suppressed,
            module_errors = stats.module_errors,
            duration_ms = ended - started,
            "Scan complete"
        );

        Ok(ScanOutcome {
            scan_id: ctx.scan_id.clone(),
            status,
            stats,
            queue: ctx.queue.stats(),
        })
    }

    /// Set the scan-wide stop flag. Idempotent, non-reversible.
    pub fn stop(&self) {
        self.shared.ctx.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.ctx.cancel.is_cancelled()
    }

    /// Token observed by workers and module hosts.
    pub fn stop_token(&self) -> CancellationToken {
        self.shared.ctx.cancel.clone()
    }

    pub fn scan_id(&self) -> &str {
        &self.shared.ctx.scan_id
    }

    pub fn target(&self) -> Arc<Target> {
        Arc::clone(&self.shared.ctx.target)
    }

    pub fn aggregator(&self) -> Arc<ResultAggregator> {
        Arc::clone(&self.shared.ctx.aggregator)
    }

    pub fn arena(&self) -> Arc<EventArena> {
        Arc::clone(&self.shared.ctx.arena)
    }

    pub fn queue(&self) -> Arc<ScanQueue<Arc<Event>>> {
        Arc::clone(&self.shared.ctx.queue)
    }

    /// Per-module delivery counters.
    pub fn module_reports(&self) -> Vec<ModuleReport> {
        self.shared
            .modules
            .iter()
            .map(|entry| ModuleReport {
                name: entry.name().to_string(),
                events_handled: entry.events_handled(),
                duplicates_suppressed: entry.duplicates_suppressed(),
                errors: entry.error_count(),
                errored: entry.is_errored(),
            })
            .collect()
    }
}
