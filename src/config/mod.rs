//! Scan Configuration Module
//!
//! Provides scan configuration loaded from TOML files or flat key-value
//! maps, replacing hardcoded behaviour with operator-tunable values.
//!
//! ## Usage
//!
//! The engine takes a `ScanConfig` explicitly, so tests and embedders can
//! construct their own. Hosts that want a process-wide instance call
//! `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(ScanConfig::default());
//!
//! // Anywhere in the codebase:
//! let timeout = config::get().fetch_timeout_secs;
//! ```

mod scan_config;
pub mod defaults;

pub use scan_config::*;

use std::sync::OnceLock;

/// Global scan configuration, initialized once at startup.
static SCAN_CONFIG: OnceLock<ScanConfig> = OnceLock::new();

/// Initialize the global scan configuration.
///
/// Repeated calls are ignored with a warning.
pub fn init(config: ScanConfig) {
    if SCAN_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global scan configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a fatal startup error, not a recoverable condition.
pub fn get() -> &'static ScanConfig {
    SCAN_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    SCAN_CONFIG.get().is_some()
}
