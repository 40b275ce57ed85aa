//! Built-in reconnaissance modules
//!
//! The engine core ships one real module: DNS resolution. It exists to
//! prove the host contract end to end; the broader module catalogue lives
//! outside the core and registers through descriptor manifests.

mod dns;

pub use dns::DnsModule;

use crate::engine::ScanModule;
use crate::resolver::ModuleDescriptor;

/// Instances of every built-in module.
pub fn builtin_modules() -> Vec<Box<dyn ScanModule>> {
    vec![Box::new(DnsModule::new())]
}

/// Resolver descriptors matching [`builtin_modules`].
pub fn builtin_descriptors() -> Vec<ModuleDescriptor> {
    vec![ModuleDescriptor::new("htm_dns")
        .watches(&["ROOT", "INTERNET_NAME"])
        .produces(&["IP_ADDRESS", "IPV6_ADDRESS"])]
}
