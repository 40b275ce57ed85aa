//! Module dependency resolver — load-order and satisfaction
//!
//! Given the event types a scan should produce, the resolver walks backwards
//! through the producer index to find every module that must be loaded,
//! closes the set over required inputs, and topologically orders it with
//! Kahn's algorithm. Diagnostics distinguish missing producers from circular
//! hard dependencies.

mod loader;

pub use loader::scan_descriptor_dir;

use crate::types::{ROOT_EVENT, WILDCARD_EVENT};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Pseudo-module name used when a requested target event type has no
/// registered producer at all.
pub const TARGET_PSEUDO_MODULE: &str = "<target>";

/// Metadata about a single module's event interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub watched_events: Vec<String>,
    #[serde(default)]
    pub produced_events: Vec<String>,
    /// Hard input dependencies; subset of `watched_events`. When empty, all
    /// watched events are treated as required.
    #[serde(default)]
    pub required_events: Vec<String>,
    #[serde(default)]
    pub optional_events: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub filepath: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u8 {
    50
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            priority: 50,
            ..Self::default()
        }
    }

    pub fn watches(mut self, events: &[&str]) -> Self {
        self.watched_events = events.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn produces(mut self, events: &[&str]) -> Self {
        self.produced_events = events.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn requires(mut self, events: &[&str]) -> Self {
        self.required_events = events.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn optionally_watches(mut self, events: &[&str]) -> Self {
        self.optional_events = events.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// Outcome status of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStatus {
    Ok,
    MissingDeps,
    Circular,
}

/// Outcome of a dependency resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub status: ResolveStatus,
    pub load_order: Vec<String>,
    pub selected_modules: Vec<String>,
    /// module → event types that have no producer
    pub missing_events: BTreeMap<String, Vec<String>>,
    pub circular_chains: Vec<Vec<String>>,
    pub warnings: Vec<String>,
}

impl ResolutionResult {
    pub fn ok(&self) -> bool {
        self.status == ResolveStatus::Ok
    }
}

/// Parameters for [`ModuleResolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Desired output event types. The resolver walks backwards from these.
    pub target_events: Vec<String>,
    /// Modules that must be included regardless.
    pub required_modules: Vec<String>,
    /// Modules to never include.
    pub exclude_modules: HashSet<String>,
    /// Also pull in producers for optional inputs.
    pub include_optional: bool,
}

/// Resolver statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ResolverStats {
    pub total_modules: usize,
    pub total_event_types: usize,
    pub total_produced_events: usize,
    pub producers_index_size: usize,
    pub consumers_index_size: usize,
}

/// Resolves module dependencies and computes load order.
#[derive(Default)]
pub struct ModuleResolver {
    modules: HashMap<String, ModuleDescriptor>,
    /// event type → module names producing it
    producers: HashMap<String, BTreeSet<String>>,
    /// event type → module names watching it
    consumers: HashMap<String, BTreeSet<String>>,
}

impl ModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module descriptor. Re-registering a name replaces it.
    pub fn register(&mut self, desc: ModuleDescriptor) {
        if self.modules.contains_key(&desc.name) {
            self.unregister(&desc.name.clone());
        }
        for evt in &desc.produced_events {
            self.producers.entry(evt.clone()).or_default().insert(desc.name.clone());
        }
        for evt in &desc.watched_events {
            self.consumers.entry(evt.clone()).or_default().insert(desc.name.clone());
        }
        self.modules.insert(desc.name.clone(), desc);
    }

    pub fn register_many(&mut self, descriptors: Vec<ModuleDescriptor>) -> usize {
        let count = descriptors.len();
        for desc in descriptors {
            self.register(desc);
        }
        count
    }

    /// Remove a descriptor. Returns false for unknown names.
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(desc) = self.modules.remove(name) else {
            return false;
        };
        for evt in &desc.produced_events {
            if let Some(set) = self.producers.get_mut(evt) {
                set.remove(name);
                if set.is_empty() {
                    self.producers.remove(evt);
                }
            }
        }
        for evt in &desc.watched_events {
            if let Some(set) = self.consumers.get_mut(evt) {
                set.remove(name);
                if set.is_empty() {
                    self.consumers.remove(evt);
                }
            }
        }
        true
    }

    pub fn get_module(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    /// All descriptors, sorted by name.
    pub fn list_modules(&self) -> Vec<&ModuleDescriptor> {
        let mut all: Vec<&ModuleDescriptor> = self.modules.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Module names that can produce the given event type.
    pub fn producers_of(&self, event_type: &str) -> BTreeSet<String> {
        self.producers.get(event_type).cloned().unwrap_or_default()
    }

    /// Module names that watch the given event type.
    pub fn consumers_of(&self, event_type: &str) -> BTreeSet<String> {
        self.consumers.get(event_type).cloned().unwrap_or_default()
    }

    pub fn all_event_types(&self) -> BTreeSet<String> {
        let mut events = BTreeSet::new();
        for desc in self.modules.values() {
            events.extend(desc.produced_events.iter().cloned());
            events.extend(desc.watched_events.iter().cloned());
        }
        events
    }

    pub fn all_produced_events(&self) -> BTreeSet<String> {
        self.producers.keys().cloned().collect()
    }

    /// Resolve the minimal module set and its load order.
    pub fn resolve(&self, request: &ResolveRequest) -> ResolutionResult {
        let exclude = &request.exclude_modules;
        let mut selected: BTreeSet<String> = BTreeSet::new();
        let mut missing: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let warnings: Vec<String> = Vec::new();

        // Seed with required modules
        for name in &request.required_modules {
            if self.modules.contains_key(name) && !exclude.contains(name) {
                selected.insert(name.clone());
            }
        }

        // Walk backwards from the target events. Gaps in transitively
        // discovered inputs are attributed to the watching module during the
        // closure pass below; only unproducible *requested* types are
        // recorded here.
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for evt in &request.target_events {
            if is_engine_produced(evt) {
                continue;
            }
            let has_producer = self.producers_of(evt).iter().any(|p| !exclude.contains(p));
            if !has_producer {
                missing
                    .entry(TARGET_PSEUDO_MODULE.to_string())
                    .or_default()
                    .insert(evt.clone());
            }
            queue.push_back(evt.clone());
        }
        while let Some(evt) = queue.pop_front() {
            if !visited.insert(evt.clone()) {
                continue;
            }
            if is_engine_produced(&evt) {
                continue;
            }
            for producer in self.producers_of(&evt) {
                if exclude.contains(&producer) || selected.contains(&producer) {
                    continue;
                }
                selected.insert(producer.clone());
                if let Some(desc) = self.modules.get(&producer) {
                    for watched in &desc.watched_events {
                        if !visited.contains(watched) {
                            queue.push_back(watched.clone());
                        }
                    }
                }
            }
        }

        // Close the set over required (or watched) inputs
        let mut changed = true;
        while changed {
            changed = false;
            for name in selected.clone() {
                let Some(desc) = self.modules.get(&name) else { continue };
                let mut to_check: Vec<&String> = if desc.required_events.is_empty() {
                    desc.watched_events.iter().collect()
                } else {
                    desc.required_events.iter().collect()
                };
                if request.include_optional {
                    to_check.extend(desc.optional_events.iter());
                }
                for evt in to_check {
                    if is_engine_produced(evt) {
                        continue;
                    }
                    let producers: Vec<String> = self
                        .producers_of(evt)
                        .into_iter()
                        .filter(|p| !exclude.contains(p))
                        .collect();
                    if producers.is_empty() {
                        missing.entry(name.clone()).or_default().insert(evt.clone());
                        continue;
                    }
                    for producer in producers {
                        if selected.insert(producer) {
                            changed = true;
                        }
                    }
                }
            }
        }

        let (load_order, cycles) = self.topological_sort(&selected);

        let selected_modules: Vec<String> = selected.iter().cloned().collect();
        let missing_events: BTreeMap<String, Vec<String>> = missing
            .into_iter()
            .map(|(name, events)| (name, events.into_iter().collect()))
            .collect();

        let status = if !cycles.is_empty() {
            ResolveStatus::Circular
        } else if !missing_events.is_empty() {
            ResolveStatus::MissingDeps
        } else {
            ResolveStatus::Ok
        };

        debug!(
            status = ?status,
            selected = selected_modules.len(),
            missing = missing_events.len(),
            "Module resolution complete"
        );

        ResolutionResult {
            status,
            load_order,
            selected_modules,
            missing_events,
            circular_chains: cycles,
            warnings,
        }
    }

    /// Resolve load order for an explicit module set, pulling in whatever is
    /// needed to satisfy their watched events.
    pub fn resolve_for_modules(&self, module_names: &[String], exclude: HashSet<String>) -> ResolutionResult {
        self.resolve(&ResolveRequest {
            required_modules: module_names.to_vec(),
            exclude_modules: exclude,
            ..ResolveRequest::default()
        })
    }

    /// Report which watched events have no producer inside the given set,
    /// ignoring ordering.
    pub fn check_satisfaction(&self, module_names: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut available: HashSet<&String> = HashSet::new();
        for name in module_names {
            if let Some(desc) = self.modules.get(name) {
                available.extend(desc.produced_events.iter());
            }
        }

        let mut unsatisfied: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in module_names {
            let Some(desc) = self.modules.get(name) else { continue };
            for evt in &desc.watched_events {
                if is_engine_produced(evt) || available.contains(evt) {
                    continue;
                }
                let entry = unsatisfied.entry(name.clone()).or_default();
                if !entry.contains(evt) {
                    entry.push(evt.clone());
                }
            }
        }
        unsatisfied
    }

    /// Kahn's algorithm over producer → consumer edges, with lexicographic
    /// tie-breaking. Returns `(order, cycles)`; the order covers only the
    /// acyclic part, the remainder is reported as one sorted chain.
    fn topological_sort(&self, module_names: &BTreeSet<String>) -> (Vec<String>, Vec<Vec<String>>) {
        let mut adjacency: HashMap<&String, BTreeSet<&String>> = HashMap::new();
        let mut in_degree: HashMap<&String, usize> = module_names.iter().map(|m| (m, 0)).collect();

        for consumer in module_names {
            let Some(desc) = self.modules.get(consumer) else { continue };
            for evt in &desc.watched_events {
                for producer in self.producers.get(evt).into_iter().flatten() {
                    if producer == consumer || !module_names.contains(producer) {
                        continue;
                    }
                    let edges = adjacency.entry(producer).or_default();
                    if edges.insert(consumer) {
                        *in_degree.entry(consumer).or_insert(0) += 1;
                    }
                }
            }
        }

        // BTreeSet keeps the ready set ordered by name for determinism
        let mut ready: BTreeSet<&String> =
            module_names.iter().filter(|m| in_degree.get(*m) == Some(&0)).collect();
        let mut order: Vec<String> = Vec::with_capacity(module_names.len());

        while let Some(&node) = ready.iter().next() {
            ready.remove(node);
            order.push(node.clone());
            for &neighbor in adjacency.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(neighbor);
                    }
                }
            }
        }

        let mut cycles = Vec::new();
        if order.len() < module_names.len() {
            let ordered: HashSet<&String> = order.iter().collect();
            let remainder: Vec<String> =
                module_names.iter().filter(|m| !ordered.contains(m)).cloned().collect();
            cycles.push(remainder);
        }

        (order, cycles)
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            total_modules: self.modules.len(),
            total_event_types: self.all_event_types().len(),
            total_produced_events: self.all_produced_events().len(),
            producers_index_size: self.producers.values().map(BTreeSet::len).sum(),
            consumers_index_size: self.consumers.values().map(BTreeSet::len).sum(),
        }
    }
}

/// Event types produced by the engine itself rather than a module.
fn is_engine_produced(event_type: &str) -> bool {
    event_type.starts_with(ROOT_EVENT) || event_type == WILDCARD_EVENT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_module_resolver() -> ModuleResolver {
        let mut resolver = ModuleResolver::new();
        resolver.register(
            ModuleDescriptor::new("htm_dns")
                .watches(&["ROOT", "INTERNET_NAME"])
                .produces(&["IP_ADDRESS"]),
        );
        resolver.register(
            ModuleDescriptor::new("htm_portscan")
                .watches(&["IP_ADDRESS"])
                .produces(&["TCP_PORT_OPEN"]),
        );
        resolver
    }

    #[test]
    fn resolves_two_module_pipeline() {
        let resolver = two_module_resolver();
        let result = resolver.resolve(&ResolveRequest {
            target_events: vec!["TCP_PORT_OPEN".to_string()],
            ..ResolveRequest::default()
        });
        assert_eq!(result.status, ResolveStatus::Ok);
        assert_eq!(result.load_order, vec!["htm_dns", "htm_portscan"]);
        assert_eq!(result.selected_modules.len(), 2);
        assert!(result.missing_events.is_empty());
    }

    #[test]
    fn reports_missing_dependency() {
        let mut resolver = ModuleResolver::new();
        resolver.register(
            ModuleDescriptor::new("htm_portscan")
                .watches(&["IP_ADDRESS"])
                .produces(&["TCP_PORT_OPEN"]),
        );
        let result = resolver.resolve(&ResolveRequest {
            target_events: vec!["TCP_PORT_OPEN".to_string()],
            ..ResolveRequest::default()
        });
        assert_eq!(result.status, ResolveStatus::MissingDeps);
        assert_eq!(
            result.missing_events.get("htm_portscan"),
            Some(&vec!["IP_ADDRESS".to_string()])
        );
        // A load order is still produced for inspection
        assert_eq!(result.load_order, vec!["htm_portscan"]);
    }

    #[test]
    fn detects_cycle() {
        let mut resolver = ModuleResolver::new();
        resolver.register(ModuleDescriptor::new("htm_a").watches(&["Y"]).produces(&["X"]));
        resolver.register(ModuleDescriptor::new("htm_b").watches(&["X"]).produces(&["Y"]));
        let result = resolver.resolve(&ResolveRequest {
            required_modules: vec!["htm_a".to_string(), "htm_b".to_string()],
            ..ResolveRequest::default()
        });
        assert_eq!(result.status, ResolveStatus::Circular);
        assert_eq!(result.circular_chains, vec![vec!["htm_a".to_string(), "htm_b".to_string()]]);
    }

    #[test]
    fn empty_request_is_ok_and_empty() {
        let resolver = two_module_resolver();
        let result = resolver.resolve(&ResolveRequest::default());
        assert_eq!(result.status, ResolveStatus::Ok);
        assert!(result.load_order.is_empty());
        assert!(result.selected_modules.is_empty());
    }

    #[test]
    fn unknown_target_event_attributed_to_target() {
        let resolver = two_module_resolver();
        let result = resolver.resolve(&ResolveRequest {
            target_events: vec!["BITCOIN_ADDRESS".to_string()],
            ..ResolveRequest::default()
        });
        assert_eq!(result.status, ResolveStatus::MissingDeps);
        assert_eq!(
            result.missing_events.get(TARGET_PSEUDO_MODULE),
            Some(&vec!["BITCOIN_ADDRESS".to_string()])
        );
    }

    #[test]
    fn excluded_modules_never_selected() {
        let resolver = two_module_resolver();
        let mut exclude = HashSet::new();
        exclude.insert("htm_dns".to_string());
        let result = resolver.resolve(&ResolveRequest {
            target_events: vec!["TCP_PORT_OPEN".to_string()],
            exclude_modules: exclude,
            ..ResolveRequest::default()
        });
        assert_eq!(result.status, ResolveStatus::MissingDeps);
        assert!(!result.selected_modules.contains(&"htm_dns".to_string()));
    }

    #[test]
    fn root_watchers_need_no_producer() {
        let mut resolver = ModuleResolver::new();
        resolver.register(
            ModuleDescriptor::new("htm_seed")
                .watches(&["ROOT"])
                .produces(&["INTERNET_NAME"]),
        );
        let result = resolver.resolve(&ResolveRequest {
            target_events: vec!["INTERNET_NAME".to_string()],
            ..ResolveRequest::default()
        });
        assert_eq!(result.status, ResolveStatus::Ok);
        assert_eq!(result.load_order, vec!["htm_seed"]);
    }

    #[test]
    fn wildcard_watcher_needs_no_producer() {
        let mut resolver = ModuleResolver::new();
        resolver.register(ModuleDescriptor::new("htm_tap").watches(&["*"]).produces(&["RAW_RIR_DATA"]));
        let result = resolver.resolve(&ResolveRequest {
            required_modules: vec!["htm_tap".to_string()],
            ..ResolveRequest::default()
        });
        assert_eq!(result.status, ResolveStatus::Ok);
    }

    #[test]
    fn optional_inputs_pulled_when_requested() {
        let mut resolver = two_module_resolver();
        resolver.register(
            ModuleDescriptor::new("htm_banner")
                .watches(&["TCP_PORT_OPEN"])
                .requires(&["TCP_PORT_OPEN"])
                .optionally_watches(&["WEBSERVER_BANNER"])
                .produces(&["OPERATING_SYSTEM"]),
        );
        resolver.register(
            ModuleDescriptor::new("htm_web")
                .watches(&["IP_ADDRESS"])
                .produces(&["WEBSERVER_BANNER"]),
        );

        let without = resolver.resolve(&ResolveRequest {
            target_events: vec!["OPERATING_SYSTEM".to_string()],
            ..ResolveRequest::default()
        });
        assert!(!without.selected_modules.contains(&"htm_web".to_string()));

        let with = resolver.resolve(&ResolveRequest {
            target_events: vec!["OPERATING_SYSTEM".to_string()],
            include_optional: true,
            ..ResolveRequest::default()
        });
        assert!(with.selected_modules.contains(&"htm_web".to_string()));
        assert_eq!(with.status, ResolveStatus::Ok);
    }

    #[test]
    fn topological_order_respects_producer_before_consumer() {
        let mut resolver = two_module_resolver();
        resolver.register(
            ModuleDescriptor::new("htm_vuln")
                .watches(&["TCP_PORT_OPEN"])
                .produces(&["VULNERABILITY_GENERAL"]),
        );
        let result = resolver.resolve(&ResolveRequest {
            target_events: vec!["VULNERABILITY_GENERAL".to_string()],
            ..ResolveRequest::default()
        });
        assert_eq!(result.status, ResolveStatus::Ok);
        let position = |name: &str| {
            result
                .load_order
                .iter()
                .position(|n| n == name)
                .unwrap_or(usize::MAX)
        };
        assert!(position("htm_dns") < position("htm_portscan"));
        assert!(position("htm_portscan") < position("htm_vuln"));
    }

    #[test]
    fn check_satisfaction_ignores_ordering() {
        let resolver = two_module_resolver();
        let unsatisfied = resolver.check_satisfaction(&[
            "htm_dns".to_string(),
            "htm_portscan".to_string(),
        ]);
        // htm_dns watches INTERNET_NAME which nothing in the set produces;
        // ROOT is engine-produced and therefore fine.
        assert_eq!(
            unsatisfied.get("htm_dns"),
            Some(&vec!["INTERNET_NAME".to_string()])
        );
        assert!(unsatisfied.get("htm_portscan").is_none());
    }

    #[test]
    fn unregister_cleans_indices() {
        let mut resolver = two_module_resolver();
        assert!(resolver.unregister("htm_dns"));
        assert!(!resolver.unregister("htm_dns"));
        assert!(resolver.producers_of("IP_ADDRESS").is_empty());
        assert_eq!(resolver.stats().total_modules, 1);
    }

    #[test]
    fn reregistration_replaces_interface() {
        let mut resolver = two_module_resolver();
        resolver.register(
            ModuleDescriptor::new("htm_dns")
                .watches(&["ROOT"])
                .produces(&["IPV6_ADDRESS"]),
        );
        assert!(resolver.producers_of("IP_ADDRESS").is_empty());
        assert!(resolver.producers_of("IPV6_ADDRESS").contains("htm_dns"));
    }
}
