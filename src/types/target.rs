//! Target — the root entity of a scan
//!
//! A target is the seed value (domain, IP, netblock, email, phone, username)
//! plus a growing set of equivalence aliases discovered during the scan
//! (e.g. an IP learned for the seed hostname). Modules consult
//! [`Target::matches`] to decide whether a discovered value is in scope.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{OnceLock, RwLock};

/// What kind of seed value a scan was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    IpAddress,
    Ipv6Address,
    Netblock,
    InternetName,
    EmailAddress,
    PhoneNumber,
    Username,
}

impl TargetKind {
    /// Event type emitted for values of this kind.
    pub fn event_type(self) -> &'static str {
        match self {
            Self::IpAddress => "IP_ADDRESS",
            Self::Ipv6Address => "IPV6_ADDRESS",
            Self::Netblock => "NETBLOCK_OWNER",
            Self::InternetName => "INTERNET_NAME",
            Self::EmailAddress => "EMAILADDR",
            Self::PhoneNumber => "PHONE_NUMBER",
            Self::Username => "USERNAME",
        }
    }
}

/// Target validation failure. Surfaced to the caller before a scan starts.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("unrecognized target value: {0}")]
    Unrecognized(String),
    #[error("empty target value")]
    Empty,
}

/// An equivalence alias of the target (e.g. IP learned for the hostname).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetAlias {
    pub value: String,
    pub kind: TargetKind,
}

/// The root entity of a scan.
///
/// Alias membership is interior-mutable so modules can register equivalences
/// mid-scan through a shared `Arc<Target>`.
#[derive(Debug)]
pub struct Target {
    value: String,
    kind: TargetKind,
    aliases: RwLock<HashSet<TargetAlias>>,
}

impl Target {
    /// Validate and classify a seed value.
    pub fn parse(value: &str) -> Result<Self, TargetError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TargetError::Empty);
        }
        let kind = detect_kind(value).ok_or_else(|| TargetError::Unrecognized(value.to_string()))?;
        Ok(Self::new(value, kind))
    }

    /// Build a target with an explicit kind (no validation).
    pub fn new(value: &str, kind: TargetKind) -> Self {
        let value = match kind {
            TargetKind::InternetName | TargetKind::EmailAddress => value.trim().to_lowercase(),
            _ => value.trim().to_string(),
        };
        Self {
            value,
            kind,
            aliases: RwLock::new(HashSet::new()),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// Register an equivalence alias for this target.
    pub fn add_alias(&self, value: &str, kind: TargetKind) {
        let normalized = match kind {
            TargetKind::InternetName | TargetKind::EmailAddress => value.trim().to_lowercase(),
            _ => value.trim().to_string(),
        };
        if normalized == self.value {
            return;
        }
        if let Ok(mut aliases) = self.aliases.write() {
            aliases.insert(TargetAlias {
                value: normalized,
                kind,
            });
        }
    }

    /// Snapshot of the current alias set.
    pub fn aliases(&self) -> Vec<TargetAlias> {
        self.aliases.read().map(|a| a.iter().cloned().collect()).unwrap_or_default()
    }

    /// Test whether a value belongs to this target's scope.
    ///
    /// A value matches if it equals the target value or any alias
    /// (case-insensitive for names), if it is an address inside a netblock
    /// target, or, when the flags allow, if it is a DNS child
    /// (`include_children`) or DNS parent (`include_parents`) of a name the
    /// target owns.
    pub fn matches(&self, value: &str, include_children: bool, include_parents: bool) -> bool {
        let candidate = value.trim().to_lowercase();
        if candidate.is_empty() {
            return false;
        }

        let mut names: Vec<String> = vec![self.value.to_lowercase()];
        let mut netblocks: Vec<String> = Vec::new();
        if self.kind == TargetKind::Netblock {
            netblocks.push(self.value.clone());
        }
        if let Ok(aliases) = self.aliases.read() {
            for alias in aliases.iter() {
                match alias.kind {
                    TargetKind::Netblock => netblocks.push(alias.value.clone()),
                    _ => names.push(alias.value.to_lowercase()),
                }
            }
        }

        for name in &names {
            if &candidate == name {
                return true;
            }
            if include_children && candidate.ends_with(&format!(".{name}")) {
                return true;
            }
            if include_parents && name.ends_with(&format!(".{candidate}")) {
                return true;
            }
        }

        if let Ok(addr) = candidate.parse::<Ipv4Addr>() {
            for block in &netblocks {
                if netblock_contains(block, addr) {
                    return true;
                }
            }
        }

        false
    }
}

/// True when `addr` falls inside the IPv4 CIDR block `block`.
fn netblock_contains(block: &str, addr: Ipv4Addr) -> bool {
    let Some((net, prefix)) = block.split_once('/') else {
        return false;
    };
    let Ok(net) = net.parse::<Ipv4Addr>() else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u32>() else {
        return false;
    };
    if prefix > 32 {
        return false;
    }
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    (u32::from(net) & mask) == (u32::from(addr) & mask)
}

fn hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}$").expect("static hostname regex")
    })
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}$").expect("static email regex")
    })
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9][0-9 .\-()]{5,19}$").expect("static phone regex"))
}

/// Classify a raw seed value, or `None` if nothing matches.
pub fn detect_kind(value: &str) -> Option<TargetKind> {
    let value = value.trim();
    if value.parse::<Ipv4Addr>().is_ok() {
        return Some(TargetKind::IpAddress);
    }
    if value.parse::<Ipv6Addr>().is_ok() {
        return Some(TargetKind::Ipv6Address);
    }
    if let Some((net, prefix)) = value.split_once('/') {
        if net.parse::<Ipv4Addr>().is_ok() && prefix.parse::<u32>().map(|p| p <= 32).unwrap_or(false) {
            return Some(TargetKind::Netblock);
        }
    }
    let lowered = value.to_lowercase();
    if email_regex().is_match(&lowered) {
        return Some(TargetKind::EmailAddress);
    }
    if hostname_regex().is_match(&lowered) {
        return Some(TargetKind::InternetName);
    }
    if phone_regex().is_match(value) {
        return Some(TargetKind::PhoneNumber);
    }
    // Quoted values are treated as usernames, matching how operators
    // disambiguate handles from hostnames.
    if value.len() >= 3 && value.starts_with('"') && value.ends_with('"') {
        return Some(TargetKind::Username);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_seed_kinds() {
        assert_eq!(detect_kind("1.2.3.4"), Some(TargetKind::IpAddress));
        assert_eq!(detect_kind("2001:db8::1"), Some(TargetKind::Ipv6Address));
        assert_eq!(detect_kind("10.0.0.0/8"), Some(TargetKind::Netblock));
        assert_eq!(detect_kind("example.com"), Some(TargetKind::InternetName));
        assert_eq!(detect_kind("user@example.com"), Some(TargetKind::EmailAddress));
        assert_eq!(detect_kind("+1 555 123 4567"), Some(TargetKind::PhoneNumber));
        assert_eq!(detect_kind("\"jsmith\""), Some(TargetKind::Username));
        assert_eq!(detect_kind("not a target !!"), None);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Target::parse("").is_err());
        assert!(Target::parse("   ").is_err());
        assert!(Target::parse("%%%%").is_err());
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let target = Target::parse("Example.COM").unwrap();
        assert!(target.matches("example.com", false, false));
        assert!(target.matches("EXAMPLE.com", false, false));
        assert!(!target.matches("other.com", false, false));
    }

    #[test]
    fn child_and_parent_matching() {
        let target = Target::parse("example.com").unwrap();
        assert!(target.matches("www.example.com", true, false));
        assert!(!target.matches("www.example.com", false, false));

        let sub = Target::parse("www.example.com").unwrap();
        assert!(sub.matches("example.com", false, true));
        assert!(!sub.matches("example.com", false, false));
    }

    #[test]
    fn alias_membership() {
        let target = Target::parse("example.com").unwrap();
        target.add_alias("93.184.216.34", TargetKind::IpAddress);
        assert!(target.matches("93.184.216.34", false, false));

        target.add_alias("example.net", TargetKind::InternetName);
        assert!(target.matches("mail.example.net", true, false));
    }

    #[test]
    fn netblock_containment() {
        let target = Target::parse("192.168.1.0/24").unwrap();
        assert!(target.matches("192.168.1.42", false, false));
        assert!(!target.matches("192.168.2.42", false, false));
    }

    #[test]
    fn netblock_alias_containment() {
        let target = Target::parse("example.com").unwrap();
        target.add_alias("10.1.0.0/16", TargetKind::Netblock);
        assert!(target.matches("10.1.200.7", false, false));
        assert!(!target.matches("10.2.0.1", false, false));
    }
}
