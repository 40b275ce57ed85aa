//! Shared DNS resolver for the module host
//!
//! Wraps a hickory resolver configured from the scan config. When
//! `_dnsserver` is set, queries go to that server; otherwise the system
//! resolver configuration is used with a fallback to public defaults.

use super::TransportError;
use crate::config::ScanConfig;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use tracing::debug;

/// Shared, process-wide DNS client.
pub struct DnsClient {
    resolver: TokioAsyncResolver,
}

impl DnsClient {
    /// Build a resolver from scan configuration.
    pub fn new(config: &ScanConfig) -> Result<Self, TransportError> {
        let resolver = match &config.dns_server {
            Some(server) => {
                let ip: IpAddr = server
                    .parse()
                    .map_err(|_| TransportError::Setup(format!("invalid DNS server address: {server}")))?;
                let group = NameServerConfigGroup::from_ips_clear(&[ip], 53, true);
                let resolver_config = ResolverConfig::from_parts(None, Vec::new(), group);
                debug!(server = %server, "DNS client using configured server");
                TokioAsyncResolver::tokio(resolver_config, ResolverOpts::default())
            }
            None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
                debug!("System resolver config unavailable — using defaults");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }),
        };
        Ok(Self { resolver })
    }

    /// Resolve a hostname to IPv4 addresses.
    pub async fn resolve_host(&self, name: &str) -> Result<Vec<String>, TransportError> {
        let lookup = self
            .resolver
            .ipv4_lookup(name)
            .await
            .map_err(|e| TransportError::Dns(e.to_string()))?;
        Ok(lookup.iter().map(|a| a.0.to_string()).collect())
    }

    /// Resolve a hostname to IPv6 addresses.
    pub async fn resolve_host6(&self, name: &str) -> Result<Vec<String>, TransportError> {
        let lookup = self
            .resolver
            .ipv6_lookup(name)
            .await
            .map_err(|e| TransportError::Dns(e.to_string()))?;
        Ok(lookup.iter().map(|a| a.0.to_string()).collect())
    }

    /// Reverse-resolve an address to hostnames.
    pub async fn reverse_resolve(&self, addr: &str) -> Result<Vec<String>, TransportError> {
        let ip: IpAddr = addr
            .parse()
            .map_err(|_| TransportError::Dns(format!("not an IP address: {addr}")))?;
        let lookup = self
            .resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| TransportError::Dns(e.to_string()))?;
        Ok(lookup
            .iter()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_bad_dns_server_address() {
        let config = ScanConfig {
            dns_server: Some("not-an-ip".to_string()),
            ..ScanConfig::default()
        };
        assert!(matches!(DnsClient::new(&config), Err(TransportError::Setup(_))));
    }

    #[tokio::test]
    async fn reverse_resolve_requires_an_address() {
        let client = DnsClient::new(&ScanConfig::default()).unwrap();
        let result = client.reverse_resolve("example.com").await;
        assert!(matches!(result, Err(TransportError::Dns(_))));
    }
}
