//! Module descriptor loading from a directory
//!
//! Modules register declaratively: each module ships a TOML manifest named
//! `<prefix>_<module>.toml` describing its event interface. The loader scans
//! a directory, parses each manifest, and registers the descriptor. Per-file
//! failures are logged and skipped; a broken manifest never aborts loading.

use super::{ModuleDescriptor, ModuleResolver};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Optional `meta` table of a descriptor manifest. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct ManifestMeta {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    use_cases: Vec<String>,
    #[serde(default)]
    data_source: Option<String>,
}

/// On-disk shape of a module descriptor manifest.
#[derive(Debug, Deserialize)]
struct DescriptorManifest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    watched_events: Vec<String>,
    #[serde(default)]
    produced_events: Vec<String>,
    #[serde(default)]
    required_events: Vec<String>,
    #[serde(default)]
    optional_events: Vec<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    meta: ManifestMeta,
}

fn default_true() -> bool {
    true
}

/// Scan a directory for `<prefix>_*.toml` manifests and register each one.
///
/// Returns the number of descriptors registered. A missing directory
/// registers nothing.
pub fn scan_descriptor_dir(resolver: &mut ModuleResolver, dir: &Path, prefix: &str) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        debug!(dir = %dir.display(), "Module descriptor directory not readable");
        return 0;
    };

    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("toml")
                && p.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| s.starts_with(&format!("{prefix}_")))
        })
        .collect();
    paths.sort();

    let mut count = 0;
    for path in paths {
        match load_manifest(&path) {
            Ok(desc) => {
                debug!(
                    module = %desc.name,
                    watched = desc.watched_events.len(),
                    produced = desc.produced_events.len(),
                    "Module descriptor loaded"
                );
                resolver.register(desc);
                count += 1;
            }
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "Skipping module manifest");
            }
        }
    }
    count
}

fn load_manifest(path: &Path) -> Result<ModuleDescriptor, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let manifest: DescriptorManifest = toml::from_str(&raw).map_err(|e| e.to_string())?;

    let name = if manifest.name.is_empty() {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| "unnameable manifest file".to_string())?
    } else {
        manifest.name
    };

    let mut tags = manifest.meta.flags;
    tags.extend(manifest.meta.use_cases);

    Ok(ModuleDescriptor {
        name,
        watched_events: manifest.watched_events,
        produced_events: manifest.produced_events,
        required_events: manifest.required_events,
        optional_events: manifest.optional_events,
        category: manifest.meta.categories.first().cloned().unwrap_or_default(),
        description: manifest.meta.summary,
        filepath: path.display().to_string(),
        tags,
        enabled: manifest.enabled,
        priority: manifest.priority.unwrap_or(50),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_manifests_and_skips_broken_ones() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("htm_dns.toml"),
            r#"
watched_events = ["ROOT", "INTERNET_NAME"]
produced_events = ["IP_ADDRESS"]

[meta]
summary = "Resolve hostnames to addresses"
categories = ["DNS"]
flags = ["passive"]
"#,
        )
        .unwrap();
        fs::write(tmp.path().join("htm_broken.toml"), "watched_events = 42").unwrap();
        fs::write(tmp.path().join("notes.txt"), "not a manifest").unwrap();
        fs::write(tmp.path().join("other_module.toml"), "produced_events = []").unwrap();

        let mut resolver = ModuleResolver::new();
        let count = scan_descriptor_dir(&mut resolver, tmp.path(), "htm");
        assert_eq!(count, 1);

        let desc = resolver.get_module("htm_dns").unwrap();
        assert_eq!(desc.produced_events, vec!["IP_ADDRESS"]);
        assert_eq!(desc.description, "Resolve hostnames to addresses");
        assert_eq!(desc.category, "DNS");
        assert!(desc.tags.contains(&"passive".to_string()));
    }

    #[test]
    fn name_defaults_to_file_stem() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("htm_whois.toml"), "produced_events = [\"DOMAIN_WHOIS\"]").unwrap();

        let mut resolver = ModuleResolver::new();
        scan_descriptor_dir(&mut resolver, tmp.path(), "htm");
        assert!(resolver.get_module("htm_whois").is_some());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("htm_future.toml"),
            r#"
produced_events = ["GEOINFO"]
shiny_new_field = true
"#,
        )
        .unwrap();

        let mut resolver = ModuleResolver::new();
        assert_eq!(scan_descriptor_dir(&mut resolver, tmp.path(), "htm"), 1);
    }

    #[test]
    fn missing_directory_registers_nothing() {
        let mut resolver = ModuleResolver::new();
        let count = scan_descriptor_dir(&mut resolver, Path::new("/nonexistent/htm-modules"), "htm");
        assert_eq!(count, 0);
    }
}
