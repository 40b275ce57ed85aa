//! Event — immutable typed finding with lineage
//!
//! Every piece of data a scan discovers is an `Event`: a type from the open
//! taxonomy, a string payload, the module that produced it, and a pointer to
//! the parent event it was derived from. The lineage pointers form a DAG
//! rooted at the single `ROOT` event that carries the scan target.
//!
//! Events are immutable once registered in the arena. New payload fields go
//! into the `properties` map rather than new struct fields.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable event identifier, assigned by the per-scan event arena.
pub type EventId = u64;

/// Type of the synthetic seed event carrying the scan target.
pub const ROOT_EVENT: &str = "ROOT";

/// Wildcard watched-event value meaning "subscribe to every type".
pub const WILDCARD_EVENT: &str = "*";

/// An immutable typed finding.
///
/// Constructed through [`EventDraft`] and the engine's event arena, which
/// assigns the id and guarantees the lineage graph stays acyclic. Fields are
/// private; accessors only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    event_type: String,
    data: String,
    module: String,
    source_event: Option<EventId>,
    /// Unix timestamp in milliseconds, monotonically non-decreasing per scan.
    generated_at: i64,
    confidence: u8,
    visibility: u8,
    risk: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module_data_source: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

impl Event {
    /// Assemble an event from its parts. Only the arena calls this; use
    /// [`EventDraft`] everywhere else.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_draft(id: EventId, generated_at: i64, draft: EventDraft) -> Self {
        Self {
            id,
            event_type: draft.event_type,
            data: draft.data,
            module: draft.module,
            source_event: draft.source_event,
            generated_at,
            confidence: draft.confidence.min(100),
            visibility: draft.visibility.min(100),
            risk: draft.risk.min(100),
            module_data_source: draft.module_data_source,
            properties: draft.properties,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Name of the module that produced this event (`"engine"` for ROOT).
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Parent event id; `None` only for the ROOT event.
    pub fn source_event(&self) -> Option<EventId> {
        self.source_event
    }

    pub fn generated_at(&self) -> i64 {
        self.generated_at
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn visibility(&self) -> u8 {
        self.visibility
    }

    pub fn risk(&self) -> u8 {
        self.risk
    }

    pub fn module_data_source(&self) -> Option<&str> {
        self.module_data_source.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn is_root(&self) -> bool {
        self.event_type == ROOT_EVENT
    }

    /// Stable dedup/diff identity: md5 over the type and the normalised data.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.event_type, &self.data)
    }
}

/// Compute the fingerprint for a (type, data) pair.
pub fn fingerprint(event_type: &str, data: &str) -> String {
    let normalized = normalize_data(event_type, data);
    format!("{:x}", md5::compute(format!("{event_type}:{normalized}")))
}

/// Normalise a payload for identity purposes.
///
/// Surrounding whitespace never matters. Host-shaped types (names, addresses,
/// email) are additionally case-folded; payloads of every other type keep
/// their case so that content findings with different renderings stay
/// distinct.
pub fn normalize_data(event_type: &str, data: &str) -> String {
    let trimmed = data.trim();
    if is_host_shaped(event_type) {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

fn is_host_shaped(event_type: &str) -> bool {
    matches!(
        event_type,
        "DOMAIN_NAME" | "INTERNET_NAME" | "IP_ADDRESS" | "IPV6_ADDRESS" | "NETBLOCK_OWNER" | "NETBLOCK_MEMBER"
    ) || event_type.starts_with("EMAILADDR")
}

/// A not-yet-registered event.
///
/// Drafts are handed to the module host's emit path (or the arena directly),
/// which assigns the id and timestamp. Builder-style setters keep call sites
/// readable.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: String,
    pub data: String,
    pub module: String,
    pub source_event: Option<EventId>,
    pub confidence: u8,
    pub visibility: u8,
    pub risk: u8,
    pub module_data_source: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl EventDraft {
    /// Start a draft for the given type and payload.
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            module: String::new(),
            source_event: None,
            confidence: 100,
            visibility: 100,
            risk: 0,
            module_data_source: None,
            properties: BTreeMap::new(),
        }
    }

    /// Draft the synthetic seed event for a scan target.
    pub fn root(target_value: impl Into<String>) -> Self {
        let mut draft = Self::new(ROOT_EVENT, target_value);
        draft.module = "engine".to_string();
        draft
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn source(mut self, parent: &Event) -> Self {
        self.source_event = Some(parent.id());
        self
    }

    pub fn source_id(mut self, parent: EventId) -> Self {
        self.source_event = Some(parent);
        self
    }

    pub fn confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn visibility(mut self, visibility: u8) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn risk(mut self, risk: u8) -> Self {
        self.risk = risk;
        self
    }

    pub fn data_source(mut self, source: impl Into<String>) -> Self {
        self.module_data_source = Some(source.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
