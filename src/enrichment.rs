//! Enrichment pipeline — pre-dispatch event decoration
//!
//! A priority-ordered chain of enrichers runs over every dequeued event
//! before fan-out. Enrichers annotate the context (tags, key-value
//! enrichments) but never touch the event's type or data. Failures are
//! isolated: a broken enricher is logged, counted, and skipped.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

/// Enricher execution priority. Lower runs earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// Enricher failure. Isolated to the failing enricher.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct EnrichError(pub String);

/// Mutable context threaded through the chain for one event.
///
/// The event's `type` and `data` are read-only by contract; annotations go
/// into `enrichments` and `tags`.
#[derive(Debug, Clone)]
pub struct EnrichmentContext {
    pub event_type: String,
    pub data: String,
    pub module: String,
    pub enrichments: BTreeMap<String, serde_json::Value>,
    pub tags: BTreeSet<String>,
    /// Set by an enricher to halt the rest of the chain.
    pub skip_remaining: bool,
    /// Per-enricher elapsed milliseconds for this context.
    pub timings: BTreeMap<String, f64>,
}

impl EnrichmentContext {
    pub fn new(event_type: &str, data: &str, module: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            data: data.to_string(),
            module: module.to_string(),
            enrichments: BTreeMap::new(),
            tags: BTreeSet::new(),
            skip_remaining: false,
            timings: BTreeMap::new(),
        }
    }

    pub fn add_enrichment(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.enrichments.insert(key.to_string(), value.into());
    }

    pub fn get_enrichment(&self, key: &str) -> Option<&serde_json::Value> {
        self.enrichments.get(key)
    }

    pub fn has_enrichment(&self, key: &str) -> bool {
        self.enrichments.contains_key(key)
    }

    pub fn add_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }
}

/// A single pre-dispatch transformer.
pub trait Enricher: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> EnrichmentPriority {
        EnrichmentPriority::Normal
    }

    /// Restrict to specific event types; `None` means all.
    fn event_types(&self) -> Option<HashSet<String>> {
        None
    }

    fn enrich(&self, ctx: &mut EnrichmentContext) -> Result<(), EnrichError>;
}

/// Adapter turning a closure into an [`Enricher`].
pub struct FunctionEnricher<F> {
    name: String,
    priority: EnrichmentPriority,
    event_types: Option<HashSet<String>>,
    func: F,
}

impl<F> FunctionEnricher<F>
where
    F: Fn(&mut EnrichmentContext) -> Result<(), EnrichError> + Send + Sync,
{
    pub fn new(name: &str, priority: EnrichmentPriority, func: F) -> Self {
        Self {
            name: name.to_string(),
            priority,
            event_types: None,
            func,
        }
    }

    pub fn for_event_types(mut self, types: HashSet<String>) -> Self {
        self.event_types = Some(types);
        self
    }
}

impl<F> Enricher for FunctionEnricher<F>
where
    F: Fn(&mut EnrichmentContext) -> Result<(), EnrichError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> EnrichmentPriority {
        self.priority
    }

    fn event_types(&self) -> Option<HashSet<String>> {
        self.event_types.clone()
    }

    fn enrich(&self, ctx: &mut EnrichmentContext) -> Result<(), EnrichError> {
        (self.func)(ctx)
    }
}

/// Tag inference from event type prefixes.
pub struct TagEnricher;

impl Enricher for TagEnricher {
    fn name(&self) -> &str {
        "tag_inference"
    }

    fn priority(&self) -> EnrichmentPriority {
        EnrichmentPriority::High
    }

    fn enrich(&self, ctx: &mut EnrichmentContext) -> Result<(), EnrichError> {
        const TAG_PREFIXES: &[(&str, &str)] = &[
            ("MALICIOUS_", "threat"),
            ("BLACKLISTED_", "threat"),
            ("VULNERABILITY_", "vulnerability"),
            ("IP_ADDRESS", "network"),
            ("IPV6_ADDRESS", "network"),
            ("INTERNET_NAME", "network"),
            ("DOMAIN_NAME", "network"),
            ("NETBLOCK_", "network"),
            ("TCP_PORT_", "network"),
            ("UDP_PORT_", "network"),
            ("EMAILADDR", "identity"),
            ("HUMAN_NAME", "identity"),
            ("USERNAME", "identity"),
            ("PHONE_NUMBER", "identity"),
            ("URL_", "web"),
            ("WEBSERVER_", "web"),
            ("CLOUD_STORAGE_", "cloud"),
        ];
        for (prefix, tag) in TAG_PREFIXES {
            if ctx.event_type.starts_with(prefix) {
                ctx.add_tag(tag);
            }
        }
        Ok(())
    }
}

/// Payload size annotation.
pub struct DataSizeEnricher;

impl Enricher for DataSizeEnricher {
    fn name(&self) -> &str {
        "data_size"
    }

    fn enrich(&self, ctx: &mut EnrichmentContext) -> Result<(), EnrichError> {
        let length = ctx.data.len() as u64;
        let is_empty = ctx.data.trim().is_empty();
        ctx.add_enrichment("data_length", length);
        ctx.add_enrichment("data_is_empty", is_empty);
        Ok(())
    }
}

struct EnricherSlot {
    enricher: Arc<dyn Enricher>,
    enabled: bool,
    seq: u64,
}

/// Running statistics for one enricher.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnricherStats {
    pub calls: u64,
    pub errors: u64,
    pub total_ms: f64,
}

/// Snapshot of the pipeline and its enrichers.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub name: String,
    pub total_processed: u64,
    pub enrichers: Vec<(String, EnricherStats)>,
}

/// One row of [`EnrichmentPipeline::list_enrichers`].
#[derive(Debug, Clone, Serialize)]
pub struct EnricherInfo {
    pub name: String,
    pub priority: EnrichmentPriority,
    pub enabled: bool,
    pub event_types: Option<Vec<String>>,
}

type ErrorCallback = Box<dyn Fn(&str, &EnrichmentContext, &EnrichError) + Send + Sync>;

/// Priority-ordered enricher chain.
pub struct EnrichmentPipeline {
    name: String,
    slots: Mutex<Vec<EnricherSlot>>,
    stats: Mutex<HashMap<String, EnricherStats>>,
    error_callbacks: Mutex<Vec<ErrorCallback>>,
    total_processed: AtomicU64,
    next_seq: AtomicU64,
}

impl Default for EnrichmentPipeline {
    fn default() -> Self {
        Self::new("default")
    }
}

impl EnrichmentPipeline {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slots: Mutex::new(Vec::new()),
            stats: Mutex::new(HashMap::new()),
            error_callbacks: Mutex::new(Vec::new()),
            total_processed: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Pipeline with the built-in tag and data-size enrichers.
    pub fn default_pipeline() -> Self {
        let pipeline = Self::new("default");
        pipeline.add(Arc::new(TagEnricher));
        pipeline.add(Arc::new(DataSizeEnricher));
        pipeline
    }

    pub fn add(&self, enricher: Arc<dyn Enricher>) {
        let Ok(mut slots) = self.slots.lock() else { return };
        slots.push(EnricherSlot {
            enricher,
            enabled: true,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        });
        slots.sort_by_key(|s| (s.enricher.priority(), s.seq));
    }

    /// Register a closure as an enricher.
    pub fn add_fn<F>(&self, name: &str, priority: EnrichmentPriority, func: F)
    where
        F: Fn(&mut EnrichmentContext) -> Result<(), EnrichError> + Send + Sync + 'static,
    {
        self.add(Arc::new(FunctionEnricher::new(name, priority, func)));
    }

    /// Remove an enricher by name. Returns false when unknown.
    pub fn remove(&self, name: &str) -> bool {
        let Ok(mut slots) = self.slots.lock() else { return false };
        let before = slots.len();
        slots.retain(|s| s.enricher.name() != name);
        before != slots.len()
    }

    /// Enable or disable an enricher. Returns false when unknown.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let Ok(mut slots) = self.slots.lock() else { return false };
        let mut found = false;
        for slot in slots.iter_mut() {
            if slot.enricher.name() == name {
                slot.enabled = enabled;
                found = true;
            }
        }
        found
    }

    pub fn enricher_count(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Enricher names in execution order.
    pub fn enricher_names(&self) -> Vec<String> {
        self.slots
            .lock()
            .map(|s| s.iter().map(|slot| slot.enricher.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn list_enrichers(&self) -> Vec<EnricherInfo> {
        self.slots
            .lock()
            .map(|slots| {
                slots
                    .iter()
                    .map(|slot| EnricherInfo {
                        name: slot.enricher.name().to_string(),
                        priority: slot.enricher.priority(),
                        enabled: slot.enabled,
                        event_types: slot.enricher.event_types().map(|t| {
                            let mut types: Vec<String> = t.into_iter().collect();
                            types.sort();
                            types
                        }),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Register a callback invoked when an enricher fails.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&str, &EnrichmentContext, &EnrichError) + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.error_callbacks.lock() {
            callbacks.push(Box::new(callback));
        }
    }

    /// Run the chain over one context.
    ///
    /// Skips disabled and filtered-out enrichers, stops early when an
    /// enricher sets `skip_remaining`, and survives enricher errors.
    pub fn process(&self, ctx: &mut EnrichmentContext) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);

        // Snapshot under the lock, run outside it
        let chain: Vec<(Arc<dyn Enricher>, bool)> = {
            let Ok(slots) = self.slots.lock() else { return };
            slots.iter().map(|s| (Arc::clone(&s.enricher), s.enabled)).collect()
        };

        for (enricher, enabled) in chain {
            if ctx.skip_remaining {
                debug!(pipeline = %self.name, "Enrichment chain halted early");
                break;
            }
            if !enabled {
                continue;
            }
            if let Some(types) = enricher.event_types() {
                if !types.contains(&ctx.event_type) {
                    continue;
                }
            }

            let start = Instant::now();
            let result = enricher.enrich(ctx);
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            ctx.timings.insert(enricher.name().to_string(), elapsed_ms);

            if let Ok(mut stats) = self.stats.lock() {
                let entry = stats.entry(enricher.name().to_string()).or_default();
                entry.calls += 1;
                entry.total_ms += elapsed_ms;
                if result.is_err() {
                    entry.errors += 1;
                }
            }

            if let Err(error) = result {
                warn!(
                    pipeline = %self.name,
                    enricher = enricher.name(),
                    error = %error,
                    "Enricher failed — skipping"
                );
                if let Ok(callbacks) = self.error_callbacks.lock() {
                    for callback in callbacks.iter() {
                        callback(enricher.name(), ctx, &error);
                    }
                }
            }
        }
    }

    /// Run the chain over several contexts.
    pub fn process_batch(&self, contexts: &mut [EnrichmentContext]) {
        for ctx in contexts {
            self.process(ctx);
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let enrichers = {
            let order = self.enricher_names();
            let stats = self.stats.lock().map(|s| s.clone()).unwrap_or_default();
            order
                .into_iter()
                .map(|name| {
                    let entry = stats.get(&name).cloned().unwrap_or_default();
                    (name, entry)
                })
                .collect()
        };
        PipelineStats {
            name: self.name.clone(),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            enrichers,
        }
    }
}
