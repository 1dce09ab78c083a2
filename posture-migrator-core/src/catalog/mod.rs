//! Policy catalog: source signature → target policies, per provider.
//!
//! The catalog is a versioned JSON document embedded into the binary at
//! compile time (`resources/catalog/catalog.json`). It can be replaced at
//! runtime with a file of the same schema when the target's policy set moves
//! faster than releases. Once loaded it is immutable.

pub mod regions;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rust_embed::RustEmbed;
use serde::Deserialize;

use crate::error::{MigrationError, MigrationResult};
use crate::types::CloudProvider;

pub use regions::{RegionDirectory, RegionRef, DEFAULT_GLOBAL_REGION_ID};

const CATALOG_FILE: &str = "catalog.json";

/// Embedded policy catalog
#[derive(RustEmbed)]
#[folder = "resources/catalog"]
#[include = "*.json"]
struct EmbeddedCatalog;

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    version: String,
    providers: BTreeMap<String, ProviderDocument>,
}

#[derive(Debug, Deserialize)]
struct ProviderDocument {
    regions: Vec<String>,
    #[serde(default)]
    global_signatures: BTreeSet<String>,
    signatures: BTreeMap<String, BTreeSet<String>>,
}

/// Catalog entries for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCatalog {
    regions: Vec<String>,
    global_signatures: BTreeSet<String>,
    signatures: BTreeMap<String, BTreeSet<String>>,
}

impl ProviderCatalog {
    /// Ordered region-code universe, without the synthetic global region.
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn signatures(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.signatures
    }

    pub fn global_signatures(&self) -> &BTreeSet<String> {
        &self.global_signatures
    }
}

/// Immutable signature→policy lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCatalog {
    version: String,
    providers: BTreeMap<CloudProvider, ProviderCatalog>,
}

impl PolicyCatalog {
    /// Load the catalog compiled into this binary.
    pub fn embedded() -> MigrationResult<Self> {
        let file = EmbeddedCatalog::get(CATALOG_FILE)
            .ok_or_else(|| MigrationError::catalog(format!("{CATALOG_FILE} is not embedded")))?;
        let json = std::str::from_utf8(&file.data)
            .map_err(|e| MigrationError::catalog(format!("{CATALOG_FILE} is not UTF-8: {e}")))?;
        Self::from_json(json)
    }

    /// Load a replacement catalog from disk.
    pub fn from_path(path: &Path) -> MigrationResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| MigrationError::catalog(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Parse and validate a catalog document.
    pub fn from_json(json: &str) -> MigrationResult<Self> {
        let document: CatalogDocument = serde_json::from_str(json)
            .map_err(|e| MigrationError::catalog(format!("invalid catalog document: {e}")))?;

        let mut providers = BTreeMap::new();
        for (name, provider_doc) in document.providers {
            let provider = CloudProvider::parse(&name)
                .ok_or_else(|| MigrationError::catalog(format!("unknown provider '{name}'")))?;
            validate_provider(provider, &provider_doc)?;
            providers.insert(
                provider,
                ProviderCatalog {
                    regions: provider_doc.regions,
                    global_signatures: provider_doc.global_signatures,
                    signatures: provider_doc.signatures,
                },
            );
        }

        if providers.is_empty() {
            return Err(MigrationError::catalog("catalog defines no providers"));
        }

        log::debug!(
            "Loaded policy catalog {} ({} providers)",
            document.version,
            providers.len()
        );

        Ok(Self {
            version: document.version,
            providers,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn providers(&self) -> impl Iterator<Item = (CloudProvider, &ProviderCatalog)> {
        self.providers.iter().map(|(p, c)| (*p, c))
    }

    pub fn provider(&self, provider: CloudProvider) -> Option<&ProviderCatalog> {
        self.providers.get(&provider)
    }

    /// Target policies a signature maps to under `provider`.
    pub fn policies_for(&self, provider: CloudProvider, signature_id: &str) -> Option<&BTreeSet<String>> {
        self.providers
            .get(&provider)
            .and_then(|c| c.signatures.get(signature_id))
    }

    /// Every provider under which the signature is catalogued.
    pub fn providers_for_signature(&self, signature_id: &str) -> Vec<CloudProvider> {
        self.providers
            .iter()
            .filter(|(_, c)| c.signatures.contains_key(signature_id))
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn is_global(&self, provider: CloudProvider, signature_id: &str) -> bool {
        self.providers
            .get(&provider)
            .is_some_and(|c| c.global_signatures.contains(signature_id))
    }

    /// Ordered region universe of `provider`; empty when the provider is unknown.
    pub fn region_universe(&self, provider: CloudProvider) -> &[String] {
        self.providers
            .get(&provider)
            .map(|c| c.regions.as_slice())
            .unwrap_or(&[])
    }
}

fn validate_provider(provider: CloudProvider, doc: &ProviderDocument) -> MigrationResult<()> {
    if doc.regions.is_empty() {
        return Err(MigrationError::catalog(format!(
            "{provider}: region universe is empty"
        )));
    }

    let mut seen = BTreeSet::new();
    for code in &doc.regions {
        if code.eq_ignore_ascii_case("global") {
            return Err(MigrationError::catalog(format!(
                "{provider}: the global region must not be part of the region universe"
            )));
        }
        if !seen.insert(code.as_str()) {
            return Err(MigrationError::catalog(format!(
                "{provider}: duplicate region code '{code}'"
            )));
        }
    }

    if let Some(orphan) = doc
        .global_signatures
        .iter()
        .find(|sig| !doc.signatures.contains_key(*sig))
    {
        return Err(MigrationError::catalog(format!(
            "{provider}: global signature {orphan} has no policy mapping"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_CATALOG: &str = r#"{
        "version": "test-1",
        "providers": {
            "aws": {
                "regions": ["r1", "r2", "r3"],
                "global_signatures": ["G"],
                "signatures": { "S": ["P2"], "G": ["P3"], "M": ["P1", "P2"] }
            }
        }
    }"#;

    #[test]
    fn test_embedded_catalog_loads() {
        let catalog = PolicyCatalog::embedded().expect("embedded catalog should load");
        assert!(!catalog.version().is_empty());

        let aws = catalog.region_universe(CloudProvider::Aws);
        assert!(aws.contains(&"us-east-1".to_string()));
        assert!(!catalog.region_universe(CloudProvider::Azure).is_empty());

        // Signature 4 maps to the full password-policy family
        let policies = catalog.policies_for(CloudProvider::Aws, "4").unwrap();
        assert_eq!(policies.len(), 9);
        assert!(policies.contains("a8dcc272-0b02-4534-8627-cf70ddd264c5"));
    }

    #[test]
    fn test_lookup() {
        let catalog = PolicyCatalog::from_json(SMALL_CATALOG).unwrap();
        assert_eq!(catalog.version(), "test-1");
        assert!(catalog.is_global(CloudProvider::Aws, "G"));
        assert!(!catalog.is_global(CloudProvider::Aws, "S"));
        assert_eq!(
            catalog.providers_for_signature("M"),
            vec![CloudProvider::Aws]
        );
        assert!(catalog.providers_for_signature("nope").is_empty());
        assert!(catalog.policies_for(CloudProvider::Azure, "S").is_none());
        assert!(catalog.region_universe(CloudProvider::Azure).is_empty());
    }

    #[test]
    fn test_rejects_global_region_in_universe() {
        let json = r#"{"version":"x","providers":{"aws":{"regions":["global","r1"],"signatures":{}}}}"#;
        assert!(matches!(
            PolicyCatalog::from_json(json),
            Err(MigrationError::Catalog(_))
        ));
    }

    #[test]
    fn test_rejects_uncatalogued_global_signature() {
        let json = r#"{"version":"x","providers":{"aws":{"regions":["r1"],"global_signatures":["9"],"signatures":{}}}}"#;
        let err = PolicyCatalog::from_json(json).unwrap_err();
        assert!(err.to_string().contains("global signature 9"));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, SMALL_CATALOG.as_bytes()).unwrap();
        let catalog = PolicyCatalog::from_path(file.path()).unwrap();
        assert_eq!(catalog.version(), "test-1");

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            PolicyCatalog::from_path(&missing),
            Err(MigrationError::Catalog(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let json = r#"{"version":"x","providers":{"gcp":{"regions":["r1"],"signatures":{}}}}"#;
        assert!(PolicyCatalog::from_json(json).is_err());
    }
}
