//! DNS resolution module
//!
//! Resolves the scan target and any discovered internet names to IPv4 and
//! IPv6 addresses through the host resolver, registering each address as a
//! target alias so downstream scope checks accept it.

use crate::config::ScanConfig;
use crate::engine::{ModuleError, ModuleHost, ScanModule};
use crate::types::{Event, EventDraft, Target, TargetKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct DnsModule {
    host: Option<Arc<ModuleHost>>,
    target: Option<Arc<Target>>,
}

impl DnsModule {
    pub fn new() -> Self {
        Self {
            host: None,
            target: None,
        }
    }

    fn host(&self) -> Result<&Arc<ModuleHost>, ModuleError> {
        self.host.as_ref().ok_or_else(|| ModuleError::Other("module not set up".to_string()))
    }

    /// Name worth resolving from this event, if any.
    fn resolvable_name(&self, event: &Event) -> Option<String> {
        if event.is_root() {
            let target = self.target.as_ref()?;
            if target.kind() == TargetKind::InternetName {
                return Some(target.value().to_string());
            }
            return None;
        }
        Some(event.data().trim().to_lowercase())
    }
}

impl Default for DnsModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScanModule for DnsModule {
    fn name(&self) -> &str {
        "htm_dns"
    }

    fn watched_events(&self) -> Vec<String> {
        vec!["ROOT".to_string(), "INTERNET_NAME".to_string()]
    }

    fn produced_events(&self) -> Vec<String> {
        vec!["IP_ADDRESS".to_string(), "IPV6_ADDRESS".to_string()]
    }

    fn setup(&mut self, host: Arc<ModuleHost>, _config: &ScanConfig) -> Result<(), ModuleError> {
        self.host = Some(host);
        Ok(())
    }

    fn set_target(&mut self, target: Arc<Target>) {
        self.target = Some(target);
    }

    async fn handle_event(&mut self, event: &Event) -> Result<(), ModuleError> {
        let Some(name) = self.resolvable_name(event) else {
            return Ok(());
        };
        let host = self.host()?.clone();

        // One resolution per name per scan
        if !host.temp_store(&name) {
            return Ok(());
        }
        if host.check_for_stop() {
            return Ok(());
        }

        match host.resolve_host(&name).await {
            Ok(addresses) => {
                debug!(name = %name, count = addresses.len(), "Resolved A records");
                for address in addresses {
                    if let Some(target) = &self.target {
                        target.add_alias(&address, TargetKind::IpAddress);
                    }
                    host.notify_listeners(EventDraft::new("IP_ADDRESS", &address).source(event))
                        .await?;
                }
            }
            Err(error) => {
                // Unresolvable names are a normal outcome, not a module fault
                debug!(name = %name, error = %error, "A lookup failed");
            }
        }

        if host.check_for_stop() {
            return Ok(());
        }

        match host.resolve_host6(&name).await {
            Ok(addresses) => {
                for address in addresses {
                    if let Some(target) = &self.target {
                        target.add_alias(&address, TargetKind::Ipv6Address);
                    }
                    host.notify_listeners(EventDraft::new("IPV6_ADDRESS", &address).source(event))
                        .await?;
                }
            }
            Err(error) => {
                debug!(name = %name, error = %error, "AAAA lookup failed");
            }
        }

        Ok(())
    }
}
