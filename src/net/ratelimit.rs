//! Sliding-window rate limiter with burst control
//!
//! Tracks two windows per identifier: a long main window and a short burst
//! sub-window. Callers over budget are told how long to wait; identifiers
//! that keep violating get blocked outright for a cool-down period.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::defaults;

/// Rate limiting budget for one identifier class.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per main window.
    pub requests: u32,
    pub window: Duration,
    /// Requests allowed per burst sub-window.
    pub burst: u32,
    pub burst_window: Duration,
    /// Violations before the identifier is blocked for the cool-down.
    pub violation_threshold: u32,
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: defaults::RATE_LIMIT_REQUESTS,
            window: Duration::from_secs(defaults::RATE_LIMIT_WINDOW_SECS),
            burst: defaults::RATE_LIMIT_BURST,
            burst_window: Duration::from_secs(defaults::RATE_LIMIT_BURST_WINDOW_SECS),
            violation_threshold: defaults::RATE_LIMIT_VIOLATION_THRESHOLD,
            cooldown: Duration::from_secs(defaults::RATE_LIMIT_COOLDOWN_SECS),
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    /// Request admitted and recorded.
    Allowed,
    /// Over budget; retry after the given delay.
    Delayed(Duration),
    /// Identifier is in cool-down after repeated violations.
    Blocked { retry_after: Duration },
}

#[derive(Default)]
struct IdentifierState {
    requests: VecDeque<Instant>,
    burst: VecDeque<Instant>,
    violations: u32,
    blocked_until: Option<Instant>,
}

/// In-memory sliding-window limiter, shared per process.
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    state: Mutex<HashMap<String, IdentifierState>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record a request for `identifier`.
    pub fn check(&self, identifier: &str) -> RateDecision {
        let now = Instant::now();
        let Ok(mut state) = self.state.lock() else {
            return RateDecision::Allowed;
        };
        let entry = state.entry(identifier.to_string()).or_default();

        if let Some(until) = entry.blocked_until {
            if now < until {
                return RateDecision::Blocked { retry_after: until - now };
            }
            // Cool-down over; start fresh
            entry.blocked_until = None;
            entry.violations = 0;
        }

        while entry.requests.front().is_some_and(|t| now.duration_since(*t) > self.config.window) {
            entry.requests.pop_front();
        }
        while entry.burst.front().is_some_and(|t| now.duration_since(*t) > self.config.burst_window) {
            entry.burst.pop_front();
        }

        let over_main = entry.requests.len() >= self.config.requests as usize;
        let over_burst = entry.burst.len() >= self.config.burst as usize;
        if over_main || over_burst {
            entry.violations += 1;
            if entry.violations >= self.config.violation_threshold {
                entry.blocked_until = Some(now + self.config.cooldown);
                warn!(
                    identifier = identifier,
                    violations = entry.violations,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "Identifier blocked after repeated rate limit violations"
                );
                return RateDecision::Blocked {
                    retry_after: self.config.cooldown,
                };
            }
            // Delay until the oldest request in the limiting window expires
            let retry = if over_burst {
                entry
                    .burst
                    .front()
                    .map(|t| self.config.burst_window.saturating_sub(now.duration_since(*t)))
                    .unwrap_or(self.config.burst_window)
            } else {
                entry
                    .requests
                    .front()
                    .map(|t| self.config.window.saturating_sub(now.duration_since(*t)))
                    .unwrap_or(self.config.window)
            };
            debug!(identifier = identifier, delay_ms = retry.as_millis() as u64, "Request delayed by rate limit");
            return RateDecision::Delayed(retry.max(Duration::from_millis(1)));
        }

        entry.requests.push_back(now);
        entry.burst.push_back(now);
        RateDecision::Allowed
    }

    /// Wait out delays until the request is admitted; fail only when the
    /// identifier is blocked.
    pub async fn acquire(&self, identifier: &str) -> Result<(), super::TransportError> {
        loop {
            match self.check(identifier) {
                RateDecision::Allowed => return Ok(()),
                RateDecision::Delayed(delay) => tokio::time::sleep(delay).await,
                RateDecision::Blocked { retry_after } => {
                    return Err(super::TransportError::RateLimited {
                        retry_after_secs: retry_after.as_secs(),
                    })
                }
            }
        }
    }

    /// Forget all recorded state for an identifier.
    pub fn reset(&self, identifier: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.remove(identifier);
        }
    }
}
