//! Shared network plumbing for the module host
//!
//! The HTTP client and DNS resolver are shared per-process and rate-limited
//! per identifier; modules reach them only through the host contract.

mod dns;
mod http;
mod ratelimit;

pub use dns::DnsClient;
pub use http::{FetchOptions, FetchResponse, HttpClient};
pub use ratelimit::{RateDecision, RateLimitConfig, SlidingWindowLimiter};

/// Transport failures inside the host. Local to the calling module: the
/// module decides whether to retry or emit a partial result.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("request failed: {0}")]
    Request(String),
    #[error("dns failure: {0}")]
    Dns(String),
    #[error("client setup failed: {0}")]
    Setup(String),
}
