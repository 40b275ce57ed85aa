//! Scan delta analyzer — structured diff between two scan runs
//!
//! Pure comparison over two finding sets: fingerprint maps on both sides,
//! set difference into ADDED / REMOVED / CHANGED / UNCHANGED classes, a
//! severity-weighted risk delta with a letter grade, per-category
//! breakdowns, risk-change tracking for findings present in both runs, and
//! a trend series over chronological scan sequences.

use crate::aggregator::categorize;
use crate::config::defaults;
use crate::types::normalize_data;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tracing::info;

/// Classification of one diffed finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Changed,
    Unchanged,
}

impl ChangeType {
    fn rank(self) -> u8 {
        match self {
            Self::Added => 0,
            Self::Removed => 1,
            Self::Changed => 2,
            Self::Unchanged => 3,
        }
    }
}

/// Severity bucket used for risk weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
            Self::Info => 4,
        }
    }

    fn weight(self) -> f64 {
        match self {
            Self::Critical => 10.0,
            Self::High => 5.0,
            Self::Medium => 2.0,
            Self::Low => 0.5,
            Self::Info => 0.1,
        }
    }
}

/// Severity of well-known event types that carry no risk score of their own.
const TYPE_SEVERITY: &[(&str, Severity)] = &[
    ("VULNERABILITY_CVE_CRITICAL", Severity::Critical),
    ("VULNERABILITY_CVE_HIGH", Severity::High),
    ("VULNERABILITY_CVE_MEDIUM", Severity::Medium),
    ("VULNERABILITY_CVE_LOW", Severity::Low),
    ("PASSWORD_COMPROMISED", Severity::Critical),
    ("EMAILADDR_COMPROMISED", Severity::High),
    ("SSL_CERTIFICATE_EXPIRED", Severity::High),
    ("SSL_CERTIFICATE_EXPIRING", Severity::Medium),
    ("CLOUD_STORAGE_BUCKET_OPEN", Severity::High),
    ("TCP_PORT_OPEN", Severity::Low),
];

/// Severity of a finding: its risk score when present, then the type table,
/// then prefix heuristics, then INFO.
pub fn severity_of(event_type: &str, risk: u8) -> Severity {
    if risk >= 80 {
        return Severity::Critical;
    }
    if risk >= 60 {
        return Severity::High;
    }
    if risk >= 40 {
        return Severity::Medium;
    }
    if risk >= 20 {
        return Severity::Low;
    }
    for (known, severity) in TYPE_SEVERITY {
        if event_type == *known {
            return *severity;
        }
    }
    if event_type.starts_with("MALICIOUS_") || event_type.starts_with("BLACKLISTED_") {
        return Severity::High;
    }
    Severity::Info
}

/// A comparison-grade record of one finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub event_type: String,
    pub data: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub risk: u8,
    #[serde(default = "default_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub scan_id: String,
}

fn default_confidence() -> u8 {
    100
}

impl Finding {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>, risk: u8) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            module: String::new(),
            risk,
            confidence: 100,
            scan_id: String::new(),
        }
    }

    /// Identity for diffing: type plus normalised payload. Raw payloads that
    /// normalise to the same identity are reported as CHANGED, not
    /// ADDED/REMOVED.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}", self.event_type, normalize_data(&self.event_type, &self.data))
    }
}

/// One diffed finding in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffItem {
    pub change_type: ChangeType,
    pub category: String,
    pub event_type: String,
    pub data: String,
    pub severity: Severity,
    /// Present only for CHANGED items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_data: Option<String>,
    pub source_module: String,
    pub scan_id: String,
}

/// A finding present in both scans whose risk score moved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskChange {
    pub event_type: String,
    pub data: String,
    pub old_risk: u8,
    pub new_risk: u8,
    /// `new_risk - old_risk`
    pub change: i16,
}

/// Diff counters for one category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryDiff {
    pub added: u64,
    pub removed: u64,
    pub changed: u64,
    pub unchanged: u64,
}

impl CategoryDiff {
    pub fn total_changes(&self) -> u64 {
        self.added + self.removed + self.changed
    }
}

/// A point in the trend series produced by [`ScanDeltaAnalyzer::analyze_series`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub scan_id: String,
    pub total_findings: u64,
    /// Sum of risk scores across the scan's findings.
    pub risk_score: u64,
    pub new_findings: u64,
    pub resolved_findings: u64,
}

/// Full comparison result between two scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaReport {
    pub comparison_id: String,
    pub scan_a_id: String,
    pub scan_b_id: String,
    pub total_added: u64,
    pub total_removed: u64,
    pub total_changed: u64,
    pub total_unchanged: u64,
    /// Severity-weighted net risk shift, clamped to `[-100, 100]`.
    pub risk_delta: f64,
    /// Letter grade: A (big reduction) through F (big increase).
    pub risk_grade: char,
    pub categories: BTreeMap<String, CategoryDiff>,
    /// Sorted by severity (CRITICAL first) then change type
    /// (ADDED, REMOVED, CHANGED, UNCHANGED); capped at `max_items`.
    pub items: Vec<DiffItem>,
    pub risk_changes: Vec<RiskChange>,
}

impl DeltaReport {
    pub fn items_of(&self, change_type: ChangeType) -> Vec<&DiffItem> {
        self.items.iter().filter(|i| i.change_type == change_type).collect()
    }
}

/// Options for a comparison.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub scan_a_id: String,
    pub scan_b_id: String,
    pub include_unchanged: bool,
    pub max_items: usize,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            scan_a_id: String::new(),
            scan_b_id: String::new(),
            include_unchanged: false,
            max_items: defaults::DELTA_MAX_ITEMS,
        }
    }
}

/// Scan comparison engine with bounded history and trend tracking.
#[derive(Default)]
pub struct ScanDeltaAnalyzer {
    /// Event types excluded from comparison entirely.
    ignore_types: HashSet<String>,
    history: Mutex<VecDeque<DeltaReport>>,
    trend: Mutex<Vec<TrendPoint>>,
}

impl ScanDeltaAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignored_types(ignore_types: HashSet<String>) -> Self {
        Self {
            ignore_types,
            ..Self::default()
        }
    }

    /// Compare a baseline scan against a current scan.
    pub fn compare(&self, baseline: &[Finding], current: &[Finding], opts: &CompareOptions) -> DeltaReport {
        let a_map = self.fingerprint_map(baseline);
        let b_map = self.fingerprint_map(current);

        let mut fingerprints: Vec<&String> = a_map.keys().chain(b_map.keys()).collect::<HashSet<_>>().into_iter().collect();
        fingerprints.sort();

        let mut items: Vec<DiffItem> = Vec::new();
        let mut categories: BTreeMap<String, CategoryDiff> = BTreeMap::new();
        let mut risk_changes: Vec<RiskChange> = Vec::new();
        let mut risk_delta = 0.0;

        for fingerprint in fingerprints {
            let in_a = a_map.get(fingerprint);
            let in_b = b_map.get(fingerprint);

            match (in_a, in_b) {
                (Some(old), None) => {
                    let severity = severity_of(&old.event_type, old.risk);
                    let category = categorize(&old.event_type).to_string();
                    categories.entry(category.clone()).or_default().removed += 1;
                    risk_delta -= severity.weight();
                    items.push(DiffItem {
                        change_type: ChangeType::Removed,
                        category,
                        event_type: old.event_type.clone(),
                        data: old.data.clone(),
                        severity,
                        old_data: None,
                        source_module: old.module.clone(),
                        scan_id: opts.scan_a_id.clone(),
                    });
                }
                (None, Some(new)) => {
                    let severity = severity_of(&new.event_type, new.risk);
                    let category = categorize(&new.event_type).to_string();
                    categories.entry(category.clone()).or_default().added += 1;
                    risk_delta += severity.weight();
                    items.push(DiffItem {
                        change_type: ChangeType::Added,
                        category,
                        event_type: new.event_type.clone(),
                        data: new.data.clone(),
                        severity,
                        old_data: None,
                        source_module: new.module.clone(),
                        scan_id: opts.scan_b_id.clone(),
                    });
                }
                (Some(old), Some(new)) => {
                    let category = categorize(&new.event_type).to_string();
                    let entry = categories.entry(category.clone()).or_default();
                    if old.data != new.data {
                        // Same identity, different rendering
                        let severity = severity_of(&new.event_type, new.risk);
                        entry.changed += 1;
                        risk_delta += severity.weight() * 0.3;
                        items.push(DiffItem {
                            change_type: ChangeType::Changed,
                            category,
                            event_type: new.event_type.clone(),
                            data: new.data.clone(),
                            severity,
                            old_data: Some(old.data.clone()),
                            source_module: new.module.clone(),
                            scan_id: opts.scan_b_id.clone(),
                        });
                    } else {
                        entry.unchanged += 1;
                        if old.risk != new.risk {
                            // Weight risk shifts by the riskier rendition so
                            // the contribution is direction-symmetric.
                            let severity =
                                severity_of(&new.event_type, new.risk.max(old.risk));
                            let shift = severity.weight() * 0.3;
                            if new.risk > old.risk {
                                risk_delta += shift;
                            } else {
                                risk_delta -= shift;
                            }
                            risk_changes.push(RiskChange {
                                event_type: new.event_type.clone(),
                                data: new.data.clone(),
                                old_risk: old.risk,
                                new_risk: new.risk,
                                change: i16::from(new.risk) - i16::from(old.risk),
                            });
                        }
                        if opts.include_unchanged {
                            items.push(DiffItem {
                                change_type: ChangeType::Unchanged,
                                category,
                                event_type: new.event_type.clone(),
                                data: new.data.clone(),
                                severity: severity_of(&new.event_type, new.risk),
                                old_data: None,
                                source_module: new.module.clone(),
                                scan_id: opts.scan_b_id.clone(),
                            });
                        }
                    }
                }
                (None, None) => {}
            }
        }

        items.sort_by(|a, b| {
            a.severity
                .rank()
                .cmp(&b.severity.rank())
                .then_with(|| a.change_type.rank().cmp(&b.change_type.rank()))
                .then_with(|| a.event_type.cmp(&b.event_type))
                .then_with(|| a.data.cmp(&b.data))
        });
        items.truncate(opts.max_items);

        let risk_delta = risk_delta.clamp(-100.0, 100.0);
        let report = DeltaReport {
            comparison_id: comparison_id(&opts.scan_a_id, &opts.scan_b_id),
            scan_a_id: opts.scan_a_id.clone(),
            scan_b_id: opts.scan_b_id.clone(),
            total_added: categories.values().map(|c| c.added).sum(),
            total_removed: categories.values().map(|c| c.removed).sum(),
            total_changed: categories.values().map(|c| c.changed).sum(),
            total_unchanged: categories.values().map(|c| c.unchanged).sum(),
            risk_delta,
            risk_grade: risk_grade(risk_delta),
            categories,
            items,
            risk_changes,
        };

        info!(
            comparison = %report.comparison_id,
            added = report.total_added,
            removed = report.total_removed,
            changed = report.total_changed,
            risk_delta = report.risk_delta,
            grade = %report.risk_grade,
            "Scan comparison complete"
        );

        if let Ok(mut history) = self.history.lock() {
            if history.len() >= defaults::DELTA_HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(report.clone());
        }

        report
    }

    /// Compare consecutive scans in chronological order, recording a trend
    /// point per transition.
    pub fn analyze_series(&self, scans: &[(String, Vec<Finding>)]) -> Vec<DeltaReport> {
        let mut reports = Vec::new();
        for window in scans.windows(2) {
            let (prev_id, prev_findings) = &window[0];
            let (curr_id, curr_findings) = &window[1];
            let report = self.compare(
                prev_findings,
                curr_findings,
                &CompareOptions {
                    scan_a_id: prev_id.clone(),
                    scan_b_id: curr_id.clone(),
                    ..CompareOptions::default()
                },
            );
            if let Ok(mut trend) = self.trend.lock() {
                trend.push(TrendPoint {
                    scan_id: curr_id.clone(),
                    total_findings: curr_findings.len() as u64,
                    risk_score: curr_findings.iter().map(|f| u64::from(f.risk)).sum(),
                    new_findings: report.total_added,
                    resolved_findings: report.total_removed,
                });
            }
            reports.push(report);
        }
        reports
    }

    /// Recorded trend history.
    pub fn get_trend(&self) -> Vec<TrendPoint> {
        self.trend.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Past comparisons, oldest first (bounded ring).
    pub fn history(&self) -> Vec<DeltaReport> {
        self.history.lock().map(|h| h.iter().cloned().collect()).unwrap_or_default()
    }

    fn fingerprint_map<'a>(&self, findings: &'a [Finding]) -> HashMap<String, &'a Finding> {
        let mut map = HashMap::new();
        for finding in findings {
            if !self.ignore_types.contains(&finding.event_type) {
                map.insert(finding.fingerprint(), finding);
            }
        }
        map
    }
}

fn comparison_id(scan_a: &str, scan_b: &str) -> String {
    let nonce: u64 = rand::random();
    let digest = md5::compute(format!("{scan_a}:{scan_b}:{nonce}"));
    format!("{digest:x}")[..16].to_string()
}

/// Letter grade for a risk delta.
fn risk_grade(delta: f64) -> char {
    if delta <= -10.0 {
        'A'
    } else if delta <= -2.0 {
        'B'
    } else if delta <= 2.0 {
        'C'
    } else if delta <= 10.0 {
        'D'
    } else {
        'F'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(a: &str, b: &str) -> CompareOptions {
        CompareOptions {
            scan_a_id: a.to_string(),
            scan_b_id: b.to_string(),
            ..CompareOptions::default()
        }
    }

    #[test]
    fn empty_sets_produce_empty_delta() {
        let analyzer = ScanDeltaAnalyzer::new();
        let report = analyzer.compare(&[], &[], &opts("a", "b"));
        assert_eq!(report.total_added, 0);
        assert_eq!(report.total_removed, 0);
        assert_eq!(report.risk_delta, 0.0);
        assert_eq!(report.risk_grade, 'C');
        assert!(report.items.is_empty());
    }

    #[test]
    fn added_and_removed_classified() {
        let analyzer = ScanDeltaAnalyzer::new();
        let baseline = vec![Finding::new("TCP_PORT_OPEN", "1.2.3.4:22", 10)];
        let current = vec![Finding::new("TCP_PORT_OPEN", "1.2.3.4:443", 10)];
        let report = analyzer.compare(&baseline, &current, &opts("a", "b"));
        assert_eq!(report.total_added, 1);
        assert_eq!(report.total_removed, 1);
        assert_eq!(report.items_of(ChangeType::Added).len(), 1);
        assert_eq!(report.items_of(ChangeType::Removed).len(), 1);
    }

    #[test]
    fn changed_fires_when_rendering_differs() {
        let analyzer = ScanDeltaAnalyzer::new();
        // Host-shaped data case-folds in the fingerprint, so these share an
        // identity while the raw payloads differ.
        let baseline = vec![Finding::new("INTERNET_NAME", "WWW.Example.COM", 0)];
        let current = vec![Finding::new("INTERNET_NAME", "www.example.com", 0)];
        let report = analyzer.compare(&baseline, &current, &opts("a", "b"));
        assert_eq!(report.total_changed, 1);
        let changed = report.items_of(ChangeType::Changed);
        assert_eq!(changed[0].old_data.as_deref(), Some("WWW.Example.COM"));
        assert_eq!(changed[0].data, "www.example.com");
    }

    #[test]
    fn risk_grading_scenario() {
        let analyzer = ScanDeltaAnalyzer::new();
        let baseline = vec![Finding::new("VULNERABILITY_GENERAL", "CVE-1", 30)];
        let current = vec![
            Finding::new("VULNERABILITY_GENERAL", "CVE-1", 80),
            Finding::new("MALICIOUS_IPADDR", "1.2.3.4", 80),
        ];
        let report = analyzer.compare(&baseline, &current, &opts("a", "b"));

        assert_eq!(report.total_added, 1);
        assert_eq!(report.risk_changes.len(), 1);
        assert_eq!(report.risk_changes[0].change, 50);
        assert!(report.risk_delta > 0.0 && report.risk_delta <= 100.0);
        assert_eq!(report.risk_grade, 'F');
    }

    #[test]
    fn delta_symmetry() {
        let analyzer = ScanDeltaAnalyzer::new();
        let a = vec![
            Finding::new("TCP_PORT_OPEN", "1.2.3.4:22", 10),
            Finding::new("IP_ADDRESS", "1.2.3.4", 0),
        ];
        let b = vec![
            Finding::new("TCP_PORT_OPEN", "1.2.3.4:443", 10),
            Finding::new("IP_ADDRESS", "1.2.3.4", 0),
        ];

        let ab = analyzer.compare(&a, &b, &opts("a", "b"));
        let ba = analyzer.compare(&b, &a, &opts("b", "a"));

        assert_eq!(ab.total_added, ba.total_removed);
        assert_eq!(ab.total_removed, ba.total_added);
        assert_eq!(ab.total_unchanged, ba.total_unchanged);

        let ab_added: Vec<&str> = ab.items_of(ChangeType::Added).iter().map(|i| i.data.as_str()).collect();
        let ba_removed: Vec<&str> = ba.items_of(ChangeType::Removed).iter().map(|i| i.data.as_str()).collect();
        assert_eq!(ab_added, ba_removed);
    }

    #[test]
    fn changed_swaps_old_and_new_across_directions() {
        let analyzer = ScanDeltaAnalyzer::new();
        let a = vec![Finding::new("INTERNET_NAME", "Mail.Example.com", 0)];
        let b = vec![Finding::new("INTERNET_NAME", "mail.example.com", 0)];

        let ab = analyzer.compare(&a, &b, &opts("a", "b"));
        let ba = analyzer.compare(&b, &a, &opts("b", "a"));

        let ab_changed = ab.items_of(ChangeType::Changed)[0].clone();
        let ba_changed = ba.items_of(ChangeType::Changed)[0].clone();
        assert_eq!(ab_changed.data, ba_changed.old_data.clone().unwrap());
        assert_eq!(ab_changed.old_data.unwrap(), ba_changed.data);
    }

    #[test]
    fn items_sorted_by_severity_then_change() {
        let analyzer = ScanDeltaAnalyzer::new();
        let baseline = vec![Finding::new("TCP_PORT_OPEN", "1.2.3.4:8080", 10)];
        let current = vec![
            Finding::new("TCP_PORT_OPEN", "1.2.3.4:443", 10),
            Finding::new("PASSWORD_COMPROMISED", "hunter2", 0),
        ];
        let report = analyzer.compare(&baseline, &current, &opts("a", "b"));
        // CRITICAL (password) first, then LOW added before LOW removed
        assert_eq!(report.items[0].event_type, "PASSWORD_COMPROMISED");
        assert_eq!(report.items[1].change_type, ChangeType::Added);
        assert_eq!(report.items[2].change_type, ChangeType::Removed);
    }

    #[test]
    fn unchanged_included_on_request() {
        let analyzer = ScanDeltaAnalyzer::new();
        let findings = vec![Finding::new("IP_ADDRESS", "1.2.3.4", 0)];
        let quiet = analyzer.compare(&findings, &findings, &opts("a", "b"));
        assert!(quiet.items.is_empty());
        assert_eq!(quiet.total_unchanged, 1);

        let verbose = analyzer.compare(
            &findings,
            &findings,
            &CompareOptions {
                include_unchanged: true,
                ..opts("a", "b")
            },
        );
        assert_eq!(verbose.items.len(), 1);
        assert_eq!(verbose.items[0].change_type, ChangeType::Unchanged);
    }

    #[test]
    fn ignored_types_are_invisible() {
        let mut ignore = HashSet::new();
        ignore.insert("RAW_RIR_DATA".to_string());
        let analyzer = ScanDeltaAnalyzer::with_ignored_types(ignore);
        let current = vec![Finding::new("RAW_RIR_DATA", "blob", 0)];
        let report = analyzer.compare(&[], &current, &opts("a", "b"));
        assert_eq!(report.total_added, 0);
    }

    #[test]
    fn max_items_caps_output_but_not_counts() {
        let analyzer = ScanDeltaAnalyzer::new();
        let current: Vec<Finding> =
            (0..20).map(|n| Finding::new("IP_ADDRESS", format!("10.0.0.{n}"), 0)).collect();
        let report = analyzer.compare(
            &[],
            &current,
            &CompareOptions {
                max_items: 5,
                ..opts("a", "b")
            },
        );
        assert_eq!(report.items.len(), 5);
        assert_eq!(report.total_added, 20);
    }

    #[test]
    fn series_records_trend() {
        let analyzer = ScanDeltaAnalyzer::new();
        let scans = vec![
            ("s1".to_string(), vec![Finding::new("IP_ADDRESS", "1.1.1.1", 0)]),
            (
                "s2".to_string(),
                vec![
                    Finding::new("IP_ADDRESS", "1.1.1.1", 0),
                    Finding::new("MALICIOUS_IPADDR", "2.2.2.2", 80),
                ],
            ),
            ("s3".to_string(), vec![Finding::new("MALICIOUS_IPADDR", "2.2.2.2", 80)]),
        ];
        let reports = analyzer.analyze_series(&scans);
        assert_eq!(reports.len(), 2);

        let trend = analyzer.get_trend();
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].scan_id, "s2");
        assert_eq!(trend[0].new_findings, 1);
        assert_eq!(trend[1].resolved_findings, 1);
        assert_eq!(trend[1].risk_score, 80);
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let analyzer = ScanDeltaAnalyzer::new();
        analyzer.compare(&[], &[], &opts("a", "b"));
        analyzer.compare(&[], &[], &opts("b", "c"));
        let history = analyzer.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].scan_a_id, "a");
        assert_eq!(history[1].scan_a_id, "b");
    }

    #[test]
    fn grade_bands() {
        assert_eq!(risk_grade(-15.0), 'A');
        assert_eq!(risk_grade(-5.0), 'B');
        assert_eq!(risk_grade(0.0), 'C');
        assert_eq!(risk_grade(5.0), 'D');
        assert_eq!(risk_grade(25.0), 'F');
    }
}
