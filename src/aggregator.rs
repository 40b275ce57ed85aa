//! Result aggregator — running scan summaries
//!
//! The engine sink feeds every produced event in here; readers get
//! consistent copy-out snapshots. Aggregation is O(1) amortised per event:
//! per-type statistics, per-module and per-category counts, a risk event
//! list for scoring and top-N queries, and a discovery timeline.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

/// Record of a single event, as the aggregator keeps it.
#[derive(Debug, Clone)]
struct EventRecord {
    event_type: String,
    data: String,
    module: String,
    confidence: u8,
    risk: u8,
    timestamp: i64,
}

/// Running accumulator for one event type.
#[derive(Debug, Default)]
struct TypeAccumulator {
    count: u64,
    values: HashSet<String>,
    modules: BTreeSet<String>,
    confidence_sum: f64,
    risk_sum: f64,
    max_risk: u8,
}

impl TypeAccumulator {
    fn record(&mut self, data: &str, module: &str, confidence: u8, risk: u8) {
        self.count += 1;
        self.values.insert(data.to_string());
        self.modules.insert(module.to_string());
        self.confidence_sum += f64::from(confidence);
        self.risk_sum += f64::from(risk);
        if risk > self.max_risk {
            self.max_risk = risk;
        }
    }
}

/// Snapshot of one event type's statistics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TypeStats {
    pub event_type: String,
    pub count: u64,
    pub unique_values: u64,
    pub avg_confidence: f64,
    pub avg_risk: f64,
    pub max_risk: u8,
    pub modules: Vec<String>,
}

/// One of the top risk events.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RiskEvent {
    pub event_type: String,
    pub data: String,
    pub module: String,
    pub risk: u8,
    pub confidence: u8,
}

/// One bucket of the discovery timeline.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimelineBucket {
    pub bucket: usize,
    pub start: i64,
    pub end: i64,
    pub count: u64,
}

/// Export-ready scan summary.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScanSummary {
    pub scan_id: String,
    pub total_events: u64,
    pub unique_types: u64,
    pub unique_modules: u64,
    pub duration_s: f64,
    pub overall_risk_score: f64,
    pub category_breakdown: Vec<(String, u64)>,
    pub top_risk_events: Vec<RiskEvent>,
    pub top_entities: Vec<(String, u64)>,
    pub module_stats: Vec<(String, u64)>,
}

#[derive(Default)]
struct AggregatorState {
    events: Vec<EventRecord>,
    type_stats: HashMap<String, TypeAccumulator>,
    module_counts: HashMap<String, u64>,
    category_counts: HashMap<String, u64>,
    risk_events: Vec<EventRecord>,
}

/// Aggregates scan results into structured summaries.
///
/// Single-writer by design (the engine sink); every reader method copies out
/// a consistent snapshot under the internal lock.
pub struct ResultAggregator {
    scan_id: String,
    started: Mutex<Instant>,
    state: Mutex<AggregatorState>,
}

/// Deterministic prefix table mapping event types to report categories.
/// First match wins, so longer/more specific prefixes come first.
const CATEGORY_PREFIXES: &[(&str, &str)] = &[
    ("MALICIOUS_", "THREAT"),
    ("BLACKLISTED_", "THREAT"),
    ("DEFACED_", "THREAT"),
    ("VULNERABILITY_", "VULNERABILITY"),
    ("EMAILADDR", "IDENTITY"),
    ("HUMAN_NAME", "IDENTITY"),
    ("PERSON_NAME", "IDENTITY"),
    ("USERNAME", "IDENTITY"),
    ("PHONE_NUMBER", "IDENTITY"),
    ("IP_ADDRESS", "INFRASTRUCTURE"),
    ("IPV6_ADDRESS", "INFRASTRUCTURE"),
    ("INTERNET_NAME", "INFRASTRUCTURE"),
    ("DOMAIN_NAME", "INFRASTRUCTURE"),
    ("NETBLOCK_", "INFRASTRUCTURE"),
    ("TCP_PORT_", "INFRASTRUCTURE"),
    ("UDP_PORT_", "INFRASTRUCTURE"),
    ("PROVIDER_", "INFRASTRUCTURE"),
    ("SSL_CERTIFICATE_", "CERTIFICATE"),
    ("URL_", "WEB"),
    ("TARGET_WEB_", "WEB"),
    ("WEBSERVER_", "WEB"),
    ("DNS_", "DNS"),
    ("BGP_", "NETWORK"),
    ("SOCIAL_MEDIA", "SOCIAL"),
    ("ACCOUNT_EXTERNAL", "SOCIAL"),
    ("CLOUD_STORAGE_", "CLOUD"),
    ("GEOINFO", "GEOLOCATION"),
    ("COUNTRY_NAME", "GEOLOCATION"),
    ("PHYSICAL_", "GEOLOCATION"),
];

/// Category of an event type: prefix table first, `*_MEDIA` suffix maps to
/// SOCIAL, everything else is OTHER.
pub fn categorize(event_type: &str) -> &'static str {
    for (prefix, category) in CATEGORY_PREFIXES {
        if event_type.starts_with(prefix) {
            return category;
        }
    }
    if event_type.ends_with("_MEDIA") {
        return "SOCIAL";
    }
    "OTHER"
}

impl ResultAggregator {
    pub fn new(scan_id: &str) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            started: Mutex::new(Instant::now()),
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Record one event. `timestamp` is unix millis.
    pub fn add_event(
        &self,
        event_type: &str,
        data: &str,
        module: &str,
        confidence: u8,
        risk: u8,
        timestamp: i64,
    ) {
        let record = EventRecord {
            event_type: event_type.to_string(),
            data: data.to_string(),
            module: module.to_string(),
            confidence,
            risk,
            timestamp,
        };

        let Ok(mut state) = self.state.lock() else { return };
        state
            .type_stats
            .entry(event_type.to_string())
            .or_default()
            .record(data, module, confidence, risk);
        *state.module_counts.entry(module.to_string()).or_insert(0) += 1;
        *state.category_counts.entry(categorize(event_type).to_string()).or_insert(0) += 1;
        if risk > 0 {
            state.risk_events.push(record.clone());
        }
        state.events.push(record);
    }

    pub fn total_events(&self) -> u64 {
        self.state.lock().map(|s| s.events.len() as u64).unwrap_or(0)
    }

    pub fn unique_types(&self) -> u64 {
        self.state.lock().map(|s| s.type_stats.len() as u64).unwrap_or(0)
    }

    pub fn unique_modules(&self) -> u64 {
        self.state.lock().map(|s| s.module_counts.len() as u64).unwrap_or(0)
    }

    /// Seconds since construction (or last reset).
    pub fn duration_s(&self) -> f64 {
        self.started.lock().map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0)
    }

    /// Self-weighted risk score in `0.0..=100.0`: high-risk findings count
    /// more than their share.
    pub fn overall_risk_score(&self) -> f64 {
        let Ok(state) = self.state.lock() else { return 0.0 };
        Self::risk_score_of(&state.risk_events)
    }

    fn risk_score_of(risk_events: &[EventRecord]) -> f64 {
        if risk_events.is_empty() {
            return 0.0;
        }
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for event in risk_events {
            let weight = f64::from(event.risk) / 100.0;
            weighted_sum += f64::from(event.risk) * weight;
            total_weight += weight;
        }
        if total_weight == 0.0 {
            return 0.0;
        }
        round1(weighted_sum / total_weight).min(100.0)
    }

    /// Statistics per event type, sorted by type name.
    pub fn get_type_stats(&self) -> Vec<TypeStats> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut stats: Vec<TypeStats> = state
            .type_stats
            .iter()
            .map(|(event_type, acc)| TypeStats {
                event_type: event_type.clone(),
                count: acc.count,
                unique_values: acc.values.len() as u64,
                avg_confidence: round1(acc.confidence_sum / acc.count as f64),
                avg_risk: round1(acc.risk_sum / acc.count as f64),
                max_risk: acc.max_risk,
                modules: acc.modules.iter().cloned().collect(),
            })
            .collect();
        stats.sort_by(|a, b| a.event_type.cmp(&b.event_type));
        stats
    }

    /// Event counts per module, busiest first.
    pub fn get_module_stats(&self) -> Vec<(String, u64)> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut counts: Vec<(String, u64)> =
            state.module_counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    /// Event counts per category, largest first.
    pub fn get_category_breakdown(&self) -> Vec<(String, u64)> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut counts: Vec<(String, u64)> =
            state.category_counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    /// The `limit` highest-risk events, data truncated to 200 bytes.
    pub fn get_top_risk_events(&self, limit: usize) -> Vec<RiskEvent> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut events: Vec<&EventRecord> = state.risk_events.iter().collect();
        events.sort_by(|a, b| b.risk.cmp(&a.risk));
        events
            .into_iter()
            .take(limit)
            .map(|e| RiskEvent {
                event_type: e.event_type.clone(),
                data: truncate(&e.data, 200),
                module: e.module.clone(),
                risk: e.risk,
                confidence: e.confidence,
            })
            .collect()
    }

    /// The most frequently seen data values (raw blobs over 200 bytes are
    /// skipped), most frequent first.
    pub fn get_top_entities(&self, limit: usize) -> Vec<(String, u64)> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for event in &state.events {
            if event.data.len() <= 200 {
                *counts.entry(event.data.as_str()).or_insert(0) += 1;
            }
        }
        let mut entities: Vec<(String, u64)> =
            counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        entities.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entities.truncate(limit);
        entities
    }

    /// Discovery timeline: `buckets` equal-width ranges over the observed
    /// timestamp span. A zero span collapses to a single bucket.
    pub fn get_timeline(&self, buckets: usize) -> Vec<TimelineBucket> {
        let Ok(state) = self.state.lock() else { return Vec::new() };
        if state.events.is_empty() || buckets == 0 {
            return Vec::new();
        }
        let min_ts = state.events.iter().map(|e| e.timestamp).min().unwrap_or(0);
        let max_ts = state.events.iter().map(|e| e.timestamp).max().unwrap_or(0);
        if min_ts == max_ts {
            return vec![TimelineBucket {
                bucket: 0,
                start: min_ts,
                end: max_ts,
                count: state.events.len() as u64,
            }];
        }

        let span = (max_ts - min_ts) as f64;
        let width = span / buckets as f64;
        (0..buckets)
            .map(|i| {
                let start = min_ts + (i as f64 * width) as i64;
                let end = min_ts + ((i + 1) as f64 * width) as i64;
                let count = state
                    .events
                    .iter()
                    .filter(|e| {
                        (e.timestamp >= start && e.timestamp < end)
                            || (i == buckets - 1 && e.timestamp == end)
                    })
                    .count() as u64;
                TimelineBucket {
                    bucket: i,
                    start,
                    end,
                    count,
                }
            })
            .collect()
    }

    /// Comprehensive snapshot of the scan so far.
    pub fn get_summary(&self) -> ScanSummary {
        ScanSummary {
            scan_id: self.scan_id.clone(),
            total_events: self.total_events(),
            unique_types: self.unique_types(),
            unique_modules: self.unique_modules(),
            duration_s: round1(self.duration_s()),
            overall_risk_score: self.overall_risk_score(),
            category_breakdown: self.get_category_breakdown(),
            top_risk_events: self.get_top_risk_events(5),
            top_entities: self.get_top_entities(5),
            module_stats: self.get_module_stats(),
        }
    }

    /// Discard everything and restart the clock.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = AggregatorState::default();
        }
        if let Ok(mut started) = self.started.lock() {
            *started = Instant::now();
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn truncate(data: &str, limit: usize) -> String {
    if data.len() <= limit {
        data.to_string()
    } else {
        data.chars().take(limit).collect()
    }
}
