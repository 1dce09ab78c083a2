//! Region directory: source region ids → target region codes.

use std::collections::HashMap;

use crate::catalog::PolicyCatalog;
use crate::error::{MigrationError, MigrationResult};
use crate::types::{CloudProvider, SourceRegion};

/// Region id the source uses for region-agnostic ("global service") findings.
pub const DEFAULT_GLOBAL_REGION_ID: &str = "9";

/// What a source region id stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionRef<'a> {
    /// The synthetic global marker; never part of a provider universe.
    Global,
    Code {
        provider: CloudProvider,
        code: &'a str,
    },
}

#[derive(Debug, Clone)]
pub struct RegionDirectory {
    regions: HashMap<String, SourceRegion>,
    global_region_id: String,
}

impl RegionDirectory {
    pub fn new(
        regions: impl IntoIterator<Item = SourceRegion>,
        global_region_id: impl Into<String>,
    ) -> Self {
        Self {
            regions: regions.into_iter().map(|r| (r.id.clone(), r)).collect(),
            global_region_id: global_region_id.into(),
        }
    }

    pub fn is_global(&self, region_id: &str) -> bool {
        region_id == self.global_region_id
    }

    pub fn lookup(&self, region_id: &str) -> Option<RegionRef<'_>> {
        if self.is_global(region_id) {
            return Some(RegionRef::Global);
        }
        self.regions.get(region_id).map(|r| RegionRef::Code {
            provider: r.provider,
            code: r.code.as_str(),
        })
    }

    /// Like [`lookup`](Self::lookup), but an id the run cannot place in a
    /// provider universe is an error.
    pub fn resolve(&self, region_id: &str, catalog: &PolicyCatalog) -> MigrationResult<RegionRef<'_>> {
        let region = self.lookup(region_id).ok_or_else(|| {
            MigrationError::region_universe(format!("region id {region_id} is not in the region directory"))
        })?;

        if let RegionRef::Code { provider, code } = region {
            if !catalog.region_universe(provider).iter().any(|c| c == code) {
                return Err(MigrationError::region_universe(format!(
                    "region id {region_id} maps to {provider} code '{code}', which is outside the {provider} universe"
                )));
            }
        }

        Ok(region)
    }
}

/// Convert a source region code to the target vocabulary.
pub fn target_region_code(provider: CloudProvider, source_code: &str) -> String {
    match provider {
        CloudProvider::Aws => source_code.replace('_', "-"),
        CloudProvider::Azure => source_code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: &str, provider: CloudProvider, code: &str) -> SourceRegion {
        SourceRegion {
            id: id.into(),
            provider,
            code: code.into(),
        }
    }

    fn catalog() -> PolicyCatalog {
        PolicyCatalog::from_json(
            r#"{"version":"t","providers":{"aws":{"regions":["us-east-1","us-west-2"],"signatures":{}}}}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_target_region_code() {
        assert_eq!(target_region_code(CloudProvider::Aws, "us_east_1"), "us-east-1");
        assert_eq!(target_region_code(CloudProvider::Azure, "westeurope"), "westeurope");
    }

    #[test]
    fn test_global_marker_wins() {
        let directory = RegionDirectory::new(
            vec![region("9", CloudProvider::Aws, "global")],
            DEFAULT_GLOBAL_REGION_ID,
        );
        assert_eq!(directory.lookup("9"), Some(RegionRef::Global));
        assert_eq!(directory.resolve("9", &catalog()).unwrap(), RegionRef::Global);
    }

    #[test]
    fn test_resolve() {
        let directory = RegionDirectory::new(
            vec![
                region("1", CloudProvider::Aws, "us-east-1"),
                region("2", CloudProvider::Aws, "mars-north-1"),
            ],
            DEFAULT_GLOBAL_REGION_ID,
        );
        let catalog = catalog();

        assert_eq!(
            directory.resolve("1", &catalog).unwrap(),
            RegionRef::Code {
                provider: CloudProvider::Aws,
                code: "us-east-1"
            }
        );
        assert!(matches!(
            directory.resolve("2", &catalog),
            Err(MigrationError::RegionUniverse(_))
        ));
        assert!(matches!(
            directory.resolve("77", &catalog),
            Err(MigrationError::RegionUniverse(_))
        ));
    }
}
