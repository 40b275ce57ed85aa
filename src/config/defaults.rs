//! Built-in default values for scan behaviour
//!
//! Every constant here can be overridden through `ScanConfig`; these are the
//! values used when nothing else is specified.

/// Default scan queue capacity (items).
pub const QUEUE_CAPACITY: usize = 10_000;

/// Default dead letter queue capacity (items).
pub const DLQ_CAPACITY: usize = 1_000;

/// Upper bound on the worker pool regardless of CPU count.
pub const MAX_WORKERS: usize = 16;

/// Default per-request HTTP fetch timeout (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

/// Default user agent presented by the shared HTTP client.
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; Huntsman)";

/// Default overall scan wall-clock budget (seconds). When exceeded the stop
/// flag is set automatically.
pub const SCAN_TIMEOUT_SECS: u64 = 3_600;

/// Poll interval workers use between dequeue attempts (milliseconds). Also
/// bounds how quickly a stop request is observed at a dequeue boundary.
pub const WORKER_POLL_MS: u64 = 100;

/// Default retry budget for queued items before they land in the DLQ.
pub const MAX_ITEM_RETRIES: u32 = 3;

/// Per-module temp-storage dedup set bound (values).
pub const TEMP_STORAGE_LIMIT: usize = 100_000;

/// Rate limiter: requests allowed per identifier per main window.
pub const RATE_LIMIT_REQUESTS: u32 = 100;

/// Rate limiter: main window length (seconds).
pub const RATE_LIMIT_WINDOW_SECS: u64 = 3_600;

/// Rate limiter: burst allowance inside the burst sub-window.
pub const RATE_LIMIT_BURST: u32 = 10;

/// Rate limiter: burst sub-window length (seconds).
pub const RATE_LIMIT_BURST_WINDOW_SECS: u64 = 60;

/// Rate limiter: violations before an identifier is blocked outright.
pub const RATE_LIMIT_VIOLATION_THRESHOLD: u32 = 5;

/// Rate limiter: cool-down period for blocked identifiers (seconds).
pub const RATE_LIMIT_COOLDOWN_SECS: u64 = 300;

/// Message bus: maximum retained messages in the in-memory log.
pub const BUS_LOG_LIMIT: usize = 10_000;

/// Delta analyzer: maximum diff items retained per comparison.
pub const DELTA_MAX_ITEMS: usize = 500;

/// Delta analyzer: comparisons kept in the history ring.
pub const DELTA_HISTORY_LIMIT: usize = 100;
