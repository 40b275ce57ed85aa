//! Event taxonomy — registry of known event types
//!
//! Consulted for validation and display. Unknown event types are accepted at
//! runtime and categorised as [`EventCategory::Other`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Coarse classification of an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    /// A concrete discovered entity (host, address, account).
    Entity,
    /// An entity derived from another entity (e.g. affiliate host).
    SubEntity,
    /// Information describing an entity (banner, geo, registrar).
    Descriptor,
    /// Raw retrieved content.
    Data,
    /// Engine-internal types (ROOT).
    Internal,
    /// Unknown types land here.
    Other,
}

/// One row of the taxonomy table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTypeInfo {
    pub raw: String,
    pub name: String,
    pub description: String,
    pub category: EventCategory,
}

/// Registry of event types.
///
/// Thread-safe; seeded with the well-known types via [`EventTaxonomy::default`]
/// and extensible at runtime.
#[derive(Debug, Default)]
pub struct EventTaxonomy {
    types: RwLock<HashMap<String, EventTypeInfo>>,
}

impl EventTaxonomy {
    /// Empty taxonomy. Prefer [`EventTaxonomy::seeded`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Taxonomy pre-loaded with the well-known event types.
    pub fn seeded() -> Self {
        let taxonomy = Self::new();
        for (raw, name, category) in SEED_TYPES {
            taxonomy.register(EventTypeInfo {
                raw: (*raw).to_string(),
                name: (*name).to_string(),
                description: String::new(),
                category: *category,
            });
        }
        taxonomy
    }

    /// Register or replace a type row.
    pub fn register(&self, info: EventTypeInfo) {
        if let Ok(mut types) = self.types.write() {
            types.insert(info.raw.clone(), info);
        }
    }

    /// Look up a type row.
    pub fn get(&self, raw: &str) -> Option<EventTypeInfo> {
        self.types.read().ok().and_then(|t| t.get(raw).cloned())
    }

    /// True when the type has been registered.
    pub fn is_known(&self, raw: &str) -> bool {
        self.types.read().map(|t| t.contains_key(raw)).unwrap_or(false)
    }

    /// Category of a type; unknown types are `Other`.
    pub fn category_of(&self, raw: &str) -> EventCategory {
        self.get(raw).map_or(EventCategory::Other, |info| info.category)
    }

    /// All registered rows, sorted by raw type.
    pub fn all(&self) -> Vec<EventTypeInfo> {
        let mut rows: Vec<EventTypeInfo> =
            self.types.read().map(|t| t.values().cloned().collect()).unwrap_or_default();
        rows.sort_by(|a, b| a.raw.cmp(&b.raw));
        rows
    }

    pub fn len(&self) -> usize {
        self.types.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const SEED_TYPES: &[(&str, &str, EventCategory)] = &[
    ("ROOT", "Scan Seed", EventCategory::Internal),
    ("IP_ADDRESS", "IP Address", EventCategory::Entity),
    ("IPV6_ADDRESS", "IPv6 Address", EventCategory::Entity),
    ("INTERNET_NAME", "Internet Name", EventCategory::Entity),
    ("DOMAIN_NAME", "Domain Name", EventCategory::Entity),
    ("AFFILIATE_INTERNET_NAME", "Affiliate Internet Name", EventCategory::SubEntity),
    ("NETBLOCK_OWNER", "Owned Netblock", EventCategory::Entity),
    ("NETBLOCK_MEMBER", "Netblock Membership", EventCategory::SubEntity),
    ("TCP_PORT_OPEN", "Open TCP Port", EventCategory::SubEntity),
    ("UDP_PORT_OPEN", "Open UDP Port", EventCategory::SubEntity),
    ("EMAILADDR", "Email Address", EventCategory::Entity),
    ("EMAILADDR_COMPROMISED", "Hacked Email Address", EventCategory::Descriptor),
    ("PASSWORD_COMPROMISED", "Compromised Password", EventCategory::Data),
    ("HUMAN_NAME", "Human Name", EventCategory::Entity),
    ("PHONE_NUMBER", "Phone Number", EventCategory::Entity),
    ("USERNAME", "Username", EventCategory::Entity),
    ("ACCOUNT_EXTERNAL_OWNED", "External Account", EventCategory::Entity),
    ("SOCIAL_MEDIA", "Social Media Presence", EventCategory::Descriptor),
    ("MALICIOUS_IPADDR", "Malicious IP Address", EventCategory::Descriptor),
    ("MALICIOUS_INTERNET_NAME", "Malicious Internet Name", EventCategory::Descriptor),
    ("BLACKLISTED_IPADDR", "Blacklisted IP Address", EventCategory::Descriptor),
    ("VULNERABILITY_CVE_CRITICAL", "Vulnerability - CVE Critical", EventCategory::Descriptor),
    ("VULNERABILITY_CVE_HIGH", "Vulnerability - CVE High", EventCategory::Descriptor),
    ("VULNERABILITY_CVE_MEDIUM", "Vulnerability - CVE Medium", EventCategory::Descriptor),
    ("VULNERABILITY_CVE_LOW", "Vulnerability - CVE Low", EventCategory::Descriptor),
    ("VULNERABILITY_GENERAL", "Vulnerability - General", EventCategory::Descriptor),
    ("SSL_CERTIFICATE_ISSUED", "SSL Certificate Issued", EventCategory::Descriptor),
    ("SSL_CERTIFICATE_EXPIRING", "SSL Certificate Expiring", EventCategory::Descriptor),
    ("SSL_CERTIFICATE_EXPIRED", "SSL Certificate Expired", EventCategory::Descriptor),
    ("URL_FORM", "URL with Form", EventCategory::Descriptor),
    ("URL_JAVASCRIPT", "URL with Javascript", EventCategory::Descriptor),
    ("WEBSERVER_BANNER", "Web Server Banner", EventCategory::Data),
    ("WEBSERVER_HTTPHEADERS", "HTTP Headers", EventCategory::Data),
    ("DNS_TEXT", "DNS TXT Record", EventCategory::Data),
    ("DNS_SPF", "DNS SPF Record", EventCategory::Data),
    ("OPERATING_SYSTEM", "Operating System", EventCategory::Descriptor),
    ("GEOINFO", "Physical Location", EventCategory::Descriptor),
    ("COUNTRY_NAME", "Country Name", EventCategory::Descriptor),
    ("PHYSICAL_ADDRESS", "Physical Address", EventCategory::Entity),
    ("CLOUD_STORAGE_BUCKET", "Cloud Storage Bucket", EventCategory::Entity),
    ("CLOUD_STORAGE_BUCKET_OPEN", "Open Cloud Storage Bucket", EventCategory::Descriptor),
    ("PROVIDER_HOSTING", "Hosting Provider", EventCategory::Entity),
    ("LEAKSITE_CONTENT", "Leak Site Content", EventCategory::Data),
    ("RAW_RIR_DATA", "Raw RIR Data", EventCategory::Data),
];
