//! Event arena — id-indexed event store with lineage
//!
//! Events are registered here and referenced everywhere else by id. The
//! arena assigns ids and monotonic timestamps, enforces that every non-ROOT
//! event points at an already-registered parent (which makes the lineage
//! graph acyclic by construction), and frees the whole scan's events in one
//! `clear`. Lineage lookups after clearing return nothing, by contract.

use super::EngineError;
use crate::types::{Event, EventDraft, EventId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug)]
pub struct EventArena {
    events: RwLock<HashMap<EventId, Arc<Event>>>,
    next_id: AtomicU64,
    last_ts: AtomicI64,
}

impl Default for EventArena {
    fn default() -> Self {
        Self::new()
    }
}

impl EventArena {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            last_ts: AtomicI64::new(0),
        }
    }

    /// Register a draft, assigning its id and timestamp.
    ///
    /// Non-ROOT drafts must reference a parent that is already registered;
    /// this is what keeps the lineage graph a DAG rooted at ROOT.
    pub fn register(&self, draft: EventDraft) -> Result<Arc<Event>, EngineError> {
        match draft.source_event {
            None => {
                if !draft.event_type.starts_with(crate::types::ROOT_EVENT) {
                    return Err(EngineError::Lineage(format!(
                        "non-ROOT event '{}' has no source event",
                        draft.event_type
                    )));
                }
            }
            Some(parent) => {
                let events = self.events.read().map_err(|e| EngineError::Fatal(e.to_string()))?;
                if !events.contains_key(&parent) {
                    return Err(EngineError::Lineage(format!(
                        "source event {parent} not registered"
                    )));
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ts = self.monotonic_now();
        let event = Arc::new(Event::from_draft(id, ts, draft));
        self.events
            .write()
            .map_err(|e| EngineError::Fatal(e.to_string()))?
            .insert(id, Arc::clone(&event));
        Ok(event)
    }

    /// Wall-clock millis, forced non-decreasing across the arena.
    fn monotonic_now(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_ts.load(Ordering::Relaxed);
        loop {
            let next = now.max(last);
            match self.last_ts.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    pub fn get(&self, id: EventId) -> Option<Arc<Event>> {
        self.events.read().ok().and_then(|e| e.get(&id).cloned())
    }

    /// Walk from an event to the ROOT, inclusive of both ends.
    ///
    /// Returns an empty vec for unknown ids (e.g. after `clear`).
    pub fn lineage(&self, id: EventId) -> Vec<Arc<Event>> {
        let Ok(events) = self.events.read() else { return Vec::new() };
        let mut chain = Vec::new();
        let mut cursor = events.get(&id).cloned();
        while let Some(event) = cursor {
            let parent = event.source_event();
            chain.push(event);
            cursor = parent.and_then(|p| events.get(&p).cloned());
            // Ids strictly increase child-ward, so this terminates.
        }
        chain
    }

    /// Drop every event atomically. Outstanding `Arc<Event>` clones stay
    /// valid but lineage lookups through the arena no longer resolve.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.write() {
            events.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
