//! Shared HTTP client for the module host
//!
//! One `reqwest` client per process, configured from the scan config
//! (user agent, timeout, optional SOCKS proxy) and guarded by the sliding
//! window rate limiter keyed on the request host.

use super::{SlidingWindowLimiter, TransportError};
use crate::config::ScanConfig;
use reqwest::redirect::Policy;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-request options for [`HttpClient::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Override the client-wide timeout.
    pub timeout: Option<Duration>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Issue a HEAD request instead of GET.
    pub head_only: bool,
    /// Skip the rate limiter (status probes, canary checks).
    pub bypass_rate_limit: bool,
}

/// Result of an HTTP fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub code: u16,
    pub content: String,
    pub headers: BTreeMap<String, String>,
    /// Final URL after redirects.
    pub real_url: String,
}

/// Shared, rate-limited HTTP client.
pub struct HttpClient {
    client: reqwest::Client,
    limiter: Arc<SlidingWindowLimiter>,
}

impl HttpClient {
    /// Build a client from scan configuration.
    pub fn new(config: &ScanConfig, limiter: Arc<SlidingWindowLimiter>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .redirect(Policy::limited(5));

        if let Some(socks) = &config.socks {
            let proxy = reqwest::Proxy::all(socks.url()).map_err(|e| TransportError::Setup(e.to_string()))?;
            builder = builder.proxy(proxy);
            debug!(proxy = %socks.url(), "HTTP client routed through SOCKS proxy");
        }

        let client = builder.build().map_err(|e| TransportError::Setup(e.to_string()))?;
        Ok(Self { client, limiter })
    }

    /// Fetch a URL.
    ///
    /// Applies the per-host rate limit, follows up to five redirects, and
    /// returns the body as text. Non-2xx responses are returned, not errors;
    /// the calling module decides what a 404 means.
    pub async fn fetch(&self, url: &str, opts: FetchOptions) -> Result<FetchResponse, TransportError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let host = parsed.host_str().unwrap_or("unknown").to_string();

        if !opts.bypass_rate_limit {
            self.limiter.acquire(&host).await?;
        }

        let mut request = if opts.head_only {
            self.client.head(parsed)
        } else {
            self.client.get(parsed)
        };
        if let Some(timeout) = opts.timeout {
            request = request.timeout(timeout);
        }
        for (name, value) in &opts.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = url, error = %e, "HTTP fetch failed");
            TransportError::Request(e.to_string())
        })?;

        let code = response.status().as_u16();
        let real_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let content = response.text().await.map_err(|e| TransportError::Request(e.to_string()))?;

        debug!(url = url, code = code, bytes = content.len(), "HTTP fetch complete");
        Ok(FetchResponse {
            code,
            content,
            headers,
            real_url,
        })
    }

    /// Decision the limiter would make for a host right now, without
    /// recording a request.
    pub fn rate_limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }
}
