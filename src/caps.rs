//! Module capability declarations
//!
//! Formal metadata about what each module provides, requires, and conflicts
//! with. The resolver consumes this to validate a selected module set; the
//! registry itself is a process-wide index with an injectable instance for
//! tests.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, OnceLock};
use tracing::debug;

/// Categories of module capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityCategory {
    Network,
    DataSource,
    Analysis,
    Enrichment,
    Storage,
    Notification,
    Transform,
}

/// A capability that a module provides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub category: CapabilityCategory,
    #[serde(default)]
    pub description: String,
}

impl Capability {
    pub fn new(name: impl Into<String>, category: CapabilityCategory) -> Self {
        Self {
            name: name.into(),
            category,
            description: String::new(),
        }
    }
}

/// A capability a module needs from its environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    /// Hard requirement when true; preferred-but-optional when false.
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl Requirement {
    pub fn new(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            required,
            description: String::new(),
        }
    }
}

/// Complete capability declaration for one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleCapabilityDeclaration {
    pub module_name: String,
    pub provides: HashSet<Capability>,
    pub requires: HashSet<Requirement>,
    pub conflicts_with: HashSet<String>,
    pub tags: HashSet<String>,
    /// Scheduling hint: 0 = highest, 100 = lowest. Defaults to 50.
    pub priority: u8,
}

impl ModuleCapabilityDeclaration {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            priority: 50,
            ..Self::default()
        }
    }

    pub fn with_capability(mut self, name: &str, category: CapabilityCategory) -> Self {
        self.provides.insert(Capability::new(name, category));
        self
    }

    pub fn with_requirement(mut self, name: &str, required: bool) -> Self {
        self.requires.insert(Requirement::new(name, required));
        self
    }

    pub fn with_conflict(mut self, module_name: &str) -> Self {
        self.conflicts_with.insert(module_name.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Names of all provided capabilities.
    pub fn capability_names(&self) -> HashSet<String> {
        self.provides.iter().map(|c| c.name.clone()).collect()
    }

    /// Names of hard requirements only.
    pub fn required_names(&self) -> HashSet<String> {
        self.requires.iter().filter(|r| r.required).map(|r| r.name.clone()).collect()
    }

    /// Names of soft requirements only.
    pub fn optional_names(&self) -> HashSet<String> {
        self.requires.iter().filter(|r| !r.required).map(|r| r.name.clone()).collect()
    }
}

#[derive(Default)]
struct RegistryState {
    declarations: HashMap<String, ModuleCapabilityDeclaration>,
    /// capability name → module names providing it
    capability_index: HashMap<String, HashSet<String>>,
}

/// Central registry for module capability declarations.
///
/// All operations are thread-safe. Registering a duplicate module name
/// replaces the prior declaration and updates every index atomically;
/// unregistering an unknown name is a no-op.
#[derive(Default)]
pub struct CapabilityRegistry {
    state: Mutex<RegistryState>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a module's declaration.
    pub fn register(&self, declaration: ModuleCapabilityDeclaration) {
        let Ok(mut state) = self.state.lock() else { return };
        // Replace semantics: drop the old declaration's index entries first.
        if let Some(old) = state.declarations.remove(&declaration.module_name) {
            Self::remove_from_index(&mut state, &old);
        }
        for cap in &declaration.provides {
            state
                .capability_index
                .entry(cap.name.clone())
                .or_default()
                .insert(declaration.module_name.clone());
        }
        debug!(
            module = %declaration.module_name,
            provides = declaration.provides.len(),
            requires = declaration.requires.len(),
            "Capability declaration registered"
        );
        state.declarations.insert(declaration.module_name.clone(), declaration);
    }

    /// Remove a module's declaration. Unknown names are a no-op.
    pub fn unregister(&self, module_name: &str) {
        let Ok(mut state) = self.state.lock() else { return };
        if let Some(decl) = state.declarations.remove(module_name) {
            Self::remove_from_index(&mut state, &decl);
        }
    }

    fn remove_from_index(state: &mut RegistryState, decl: &ModuleCapabilityDeclaration) {
        for cap in &decl.provides {
            let empty = if let Some(providers) = state.capability_index.get_mut(&cap.name) {
                providers.remove(&decl.module_name);
                providers.is_empty()
            } else {
                false
            };
            if empty {
                state.capability_index.remove(&cap.name);
            }
        }
    }

    pub fn get(&self, module_name: &str) -> Option<ModuleCapabilityDeclaration> {
        self.state.lock().ok()?.declarations.get(module_name).cloned()
    }

    /// Modules that provide a specific capability, sorted by name.
    pub fn find_providers(&self, capability_name: &str) -> Vec<String> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut names: Vec<String> = state
            .capability_index
            .get(capability_name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Modules with at least one capability in the given category.
    pub fn find_by_category(&self, category: CapabilityCategory) -> Vec<String> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut names: Vec<String> = state
            .declarations
            .values()
            .filter(|d| d.provides.iter().any(|c| c.category == category))
            .map(|d| d.module_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Modules carrying the given tag.
    pub fn find_by_tag(&self, tag: &str) -> Vec<String> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut names: Vec<String> = state
            .declarations
            .values()
            .filter(|d| d.tags.contains(tag))
            .map(|d| d.module_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Conflicting pairs within a module set.
    ///
    /// A pair is reported when either side declares the other in
    /// `conflicts_with`. Pairs are returned sorted and deduplicated.
    pub fn find_conflicts(&self, module_names: &[String]) -> Vec<(String, String)> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let name_set: HashSet<&str> = module_names.iter().map(String::as_str).collect();
        let mut pairs: Vec<(String, String)> = Vec::new();
        for name in module_names {
            let Some(decl) = state.declarations.get(name) else { continue };
            for conflict in &decl.conflicts_with {
                if name_set.contains(conflict.as_str()) {
                    let pair = if name < conflict {
                        (name.clone(), conflict.clone())
                    } else {
                        (conflict.clone(), name.clone())
                    };
                    if !pairs.contains(&pair) {
                        pairs.push(pair);
                    }
                }
            }
        }
        pairs.sort();
        pairs
    }

    /// Unmet hard requirements per module.
    ///
    /// A requirement is unmet iff no module in the set provides a capability
    /// with that name. Modules with no unmet requirements are absent from the
    /// result.
    pub fn check_requirements(&self, module_names: &[String]) -> BTreeMap<String, Vec<String>> {
        let Ok(state) = self.state.lock() else { return BTreeMap::new() };
        let mut provided: HashSet<String> = HashSet::new();
        for name in module_names {
            if let Some(decl) = state.declarations.get(name) {
                provided.extend(decl.provides.iter().map(|c| c.name.clone()));
            }
        }

        let mut unmet = BTreeMap::new();
        for name in module_names {
            let Some(decl) = state.declarations.get(name) else { continue };
            let mut missing: Vec<String> = decl
                .requires
                .iter()
                .filter(|r| r.required && !provided.contains(&r.name))
                .map(|r| r.name.clone())
                .collect();
            if !missing.is_empty() {
                missing.sort();
                unmet.insert(name.clone(), missing);
            }
        }
        unmet
    }

    /// Scheduling-hint ordering: `(priority asc, required count asc, name asc)`.
    ///
    /// This is only a hint; the resolver computes the true topological order.
    pub fn get_dependency_order(&self, module_names: &[String]) -> Vec<String> {
        let Ok(state) = self.state.lock() else { return module_names.to_vec() };
        let mut decorated: Vec<(u8, usize, String)> = module_names
            .iter()
            .map(|name| {
                let decl = state.declarations.get(name);
                let priority = decl.map_or(50, |d| d.priority);
                let req_count = decl.map_or(0, |d| d.required_names().len());
                (priority, req_count, name.clone())
            })
            .collect();
        decorated.sort();
        decorated.into_iter().map(|(_, _, name)| name).collect()
    }

    /// All registered capabilities and their providers, sorted.
    pub fn get_all_capabilities(&self) -> BTreeMap<String, Vec<String>> {
        let Ok(state) = self.state.lock() else { return BTreeMap::new() };
        state
            .capability_index
            .iter()
            .map(|(cap, providers)| {
                let mut names: Vec<String> = providers.iter().cloned().collect();
                names.sort();
                (cap.clone(), names)
            })
            .collect()
    }

    /// All tags and their usage counts.
    pub fn get_all_tags(&self) -> BTreeMap<String, usize> {
        let Ok(state) = self.state.lock() else { return BTreeMap::new() };
        let mut tags: BTreeMap<String, usize> = BTreeMap::new();
        for decl in state.declarations.values() {
            for tag in &decl.tags {
                *tags.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        tags
    }

    pub fn module_count(&self) -> usize {
        self.state.lock().map(|s| s.declarations.len()).unwrap_or(0)
    }

    pub fn capability_count(&self) -> usize {
        self.state.lock().map(|s| s.capability_index.len()).unwrap_or(0)
    }
}

/// Process-wide default registry.
///
/// Components take `&CapabilityRegistry` so tests can substitute a fresh
/// instance; this accessor exists for hosts that want the shared one.
pub fn global_registry() -> &'static CapabilityRegistry {
    static REGISTRY: OnceLock<CapabilityRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CapabilityRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns_decl() -> ModuleCapabilityDeclaration {
        ModuleCapabilityDeclaration::new("htm_dns")
            .with_capability("dns_resolution", CapabilityCategory::Network)
            .with_requirement("network_access", true)
            .with_tag("passive")
            .with_priority(10)
    }

    #[test]
    fn register_and_find_providers() {
        let registry = CapabilityRegistry::new();
        registry.register(dns_decl());
        assert_eq!(registry.find_providers("dns_resolution"), vec!["htm_dns"]);
        assert_eq!(registry.module_count(), 1);
        assert_eq!(registry.capability_count(), 1);
    }

    #[test]
    fn duplicate_registration_replaces() {
        let registry = CapabilityRegistry::new();
        registry.register(dns_decl());
        // Re-register with a different capability set
        registry.register(
            ModuleCapabilityDeclaration::new("htm_dns")
                .with_capability("reverse_dns", CapabilityCategory::Network),
        );
        assert!(registry.find_providers("dns_resolution").is_empty());
        assert_eq!(registry.find_providers("reverse_dns"), vec!["htm_dns"]);
        assert_eq!(registry.module_count(), 1);
    }

    #[test]
    fn unregister_clears_all_indices() {
        let registry = CapabilityRegistry::new();
        registry.register(dns_decl());
        registry.unregister("htm_dns");
        assert!(registry.get("htm_dns").is_none());
        assert!(registry.find_providers("dns_resolution").is_empty());
        assert_eq!(registry.capability_count(), 0);
        // Unknown name is a no-op
        registry.unregister("htm_missing");
    }

    #[test]
    fn find_by_category_and_tag() {
        let registry = CapabilityRegistry::new();
        registry.register(dns_decl());
        registry.register(
            ModuleCapabilityDeclaration::new("htm_threatfeed")
                .with_capability("reputation_lookup", CapabilityCategory::DataSource)
                .with_tag("passive"),
        );
        assert_eq!(registry.find_by_category(CapabilityCategory::Network), vec!["htm_dns"]);
        assert_eq!(
            registry.find_by_tag("passive"),
            vec!["htm_dns", "htm_threatfeed"]
        );
        assert_eq!(registry.get_all_tags().get("passive"), Some(&2));
    }

    #[test]
    fn conflicts_reported_once_per_pair() {
        let registry = CapabilityRegistry::new();
        registry.register(ModuleCapabilityDeclaration::new("htm_fast").with_conflict("htm_slow"));
        registry.register(ModuleCapabilityDeclaration::new("htm_slow").with_conflict("htm_fast"));
        let conflicts =
            registry.find_conflicts(&["htm_fast".to_string(), "htm_slow".to_string()]);
        assert_eq!(conflicts, vec![("htm_fast".to_string(), "htm_slow".to_string())]);
    }

    #[test]
    fn conflict_outside_selection_ignored() {
        let registry = CapabilityRegistry::new();
        registry.register(ModuleCapabilityDeclaration::new("htm_fast").with_conflict("htm_slow"));
        let conflicts = registry.find_conflicts(&["htm_fast".to_string()]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn requirements_checked_against_selection() {
        let registry = CapabilityRegistry::new();
        registry.register(dns_decl());
        registry.register(
            ModuleCapabilityDeclaration::new("htm_net")
                .with_capability("network_access", CapabilityCategory::Network),
        );

        // Alone: network_access unmet
        let unmet = registry.check_requirements(&["htm_dns".to_string()]);
        assert_eq!(unmet.get("htm_dns"), Some(&vec!["network_access".to_string()]));

        // With the provider selected: satisfied
        let unmet = registry.check_requirements(&["htm_dns".to_string(), "htm_net".to_string()]);
        assert!(unmet.is_empty());
    }

    #[test]
    fn optional_requirements_never_unmet() {
        let registry = CapabilityRegistry::new();
        registry.register(
            ModuleCapabilityDeclaration::new("htm_geo").with_requirement("geo_db", false),
        );
        let unmet = registry.check_requirements(&["htm_geo".to_string()]);
        assert!(unmet.is_empty());
    }

    #[test]
    fn dependency_order_is_stable() {
        let registry = CapabilityRegistry::new();
        registry.register(ModuleCapabilityDeclaration::new("htm_b").with_priority(10));
        registry.register(ModuleCapabilityDeclaration::new("htm_a").with_priority(10));
        registry.register(
            ModuleCapabilityDeclaration::new("htm_deep")
                .with_priority(10)
                .with_requirement("x", true)
                .with_requirement("y", true),
        );
        registry.register(ModuleCapabilityDeclaration::new("htm_late").with_priority(90));

        let order = registry.get_dependency_order(&[
            "htm_late".to_string(),
            "htm_deep".to_string(),
            "htm_b".to_string(),
            "htm_a".to_string(),
        ]);
        // priority asc, then required-count asc, then name asc
        assert_eq!(order, vec!["htm_a", "htm_b", "htm_deep", "htm_late"]);
    }
}
