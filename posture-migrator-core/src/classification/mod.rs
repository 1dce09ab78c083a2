//! Suppression classification.
//!
//! Raw suppression records are partitioned once per run into four classes:
//! regional, global-signature, all-region-signature and
//! some-region-signature. A record carrying both a global and a non-global
//! signature lands in the global class and in one of the region classes.
//!
//! Region coverage is always measured against the provider's universe with
//! the synthetic global region excluded, on every branch.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::{PolicyCatalog, RegionDirectory, RegionRef};
use crate::error::MigrationResult;
use crate::types::{CloudProvider, Suppression};

/// Region codes a suppression names, grouped by provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionCoverage {
    pub codes: BTreeMap<CloudProvider, BTreeSet<String>>,
    pub covers_global_region: bool,
}

impl RegionCoverage {
    pub fn codes_for(&self, provider: CloudProvider) -> Option<&BTreeSet<String>> {
        self.codes.get(&provider)
    }
}

/// A suppression that disables everything in its regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionalSuppression {
    pub id: String,
    pub external_account_ids: BTreeSet<String>,
    pub coverage: RegionCoverage,
}

impl RegionalSuppression {
    pub fn applies_to(&self, external_account_id: &str) -> bool {
        self.external_account_ids.contains(external_account_id)
    }
}

/// A signature suppression narrowed to one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSuppression {
    pub id: String,
    pub provider: CloudProvider,
    pub external_account_ids: BTreeSet<String>,
    pub signature_ids: BTreeSet<String>,
    /// Codes within `provider`'s universe; never contains the global region.
    pub region_codes: BTreeSet<String>,
    pub covers_global_region: bool,
}

impl SignatureSuppression {
    pub fn applies_to(&self, external_account_id: &str, provider: CloudProvider) -> bool {
        self.provider == provider && self.external_account_ids.contains(external_account_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedSuppressions {
    pub regional: Vec<RegionalSuppression>,
    pub global_signature: Vec<SignatureSuppression>,
    pub all_region: Vec<SignatureSuppression>,
    pub some_region: Vec<SignatureSuppression>,
}

impl ClassifiedSuppressions {
    pub fn total(&self) -> usize {
        self.regional.len() + self.global_signature.len() + self.all_region.len() + self.some_region.len()
    }
}

pub struct SuppressionClassifier<'a> {
    catalog: &'a PolicyCatalog,
    regions: &'a RegionDirectory,
}

impl<'a> SuppressionClassifier<'a> {
    pub fn new(catalog: &'a PolicyCatalog, regions: &'a RegionDirectory) -> Self {
        Self { catalog, regions }
    }

    /// Classify every record of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::RegionUniverse`](crate::error::MigrationError::RegionUniverse)
    /// when a record names a region id the directory cannot place.
    pub fn classify(&self, suppressions: &[Suppression]) -> MigrationResult<ClassifiedSuppressions> {
        let mut classified = ClassifiedSuppressions::default();

        for suppression in suppressions {
            if !suppression.resource_scope.is_empty() {
                log::trace!("Suppression {} is resource-scoped, ignoring", suppression.id);
                continue;
            }

            if suppression.signature_ids.is_empty() {
                if !suppression.custom_signature_ids.is_empty() {
                    log::debug!(
                        "Suppression {} only names custom signatures, ignoring",
                        suppression.id
                    );
                    continue;
                }
                classified.regional.push(RegionalSuppression {
                    id: suppression.id.clone(),
                    external_account_ids: suppression.external_account_ids.clone(),
                    coverage: self.coverage(suppression)?,
                });
                continue;
            }

            self.classify_signatures(suppression, &mut classified)?;
        }

        log::debug!(
            "Classified suppressions: {} regional, {} global-signature, {} all-region, {} some-region",
            classified.regional.len(),
            classified.global_signature.len(),
            classified.all_region.len(),
            classified.some_region.len()
        );

        Ok(classified)
    }

    fn coverage(&self, suppression: &Suppression) -> MigrationResult<RegionCoverage> {
        let mut coverage = RegionCoverage::default();
        for region_id in &suppression.region_ids {
            match self.regions.resolve(region_id, self.catalog)? {
                RegionRef::Global => coverage.covers_global_region = true,
                RegionRef::Code { provider, code } => {
                    coverage
                        .codes
                        .entry(provider)
                        .or_default()
                        .insert(code.to_string());
                }
            }
        }
        Ok(coverage)
    }

    fn classify_signatures(
        &self,
        suppression: &Suppression,
        classified: &mut ClassifiedSuppressions,
    ) -> MigrationResult<()> {
        let mut by_provider: BTreeMap<CloudProvider, (BTreeSet<String>, BTreeSet<String>)> = BTreeMap::new();

        for signature_id in &suppression.signature_ids {
            let providers = self.catalog.providers_for_signature(signature_id);
            if providers.is_empty() {
                log::debug!(
                    "Suppression {}: signature {} has no policy mapping, dropping it",
                    suppression.id,
                    signature_id
                );
                continue;
            }
            for provider in providers {
                let (global, regional) = by_provider.entry(provider).or_default();
                if self.catalog.is_global(provider, signature_id) {
                    global.insert(signature_id.clone());
                } else {
                    regional.insert(signature_id.clone());
                }
            }
        }

        if by_provider.is_empty() {
            log::debug!(
                "Suppression {} has no mappable signatures, excluding it",
                suppression.id
            );
            return Ok(());
        }

        // Regions are only checked for records that survive the drops above
        let coverage = self.coverage(suppression)?;
        for (provider, (global, regional)) in by_provider {
            let codes = coverage.codes_for(provider).cloned().unwrap_or_default();
            let record = |signature_ids: BTreeSet<String>| SignatureSuppression {
                id: suppression.id.clone(),
                provider,
                external_account_ids: suppression.external_account_ids.clone(),
                signature_ids,
                region_codes: codes.clone(),
                covers_global_region: coverage.covers_global_region,
            };

            if !global.is_empty() {
                classified.global_signature.push(record(global));
            }

            if regional.is_empty() {
                continue;
            }

            let universe = self.catalog.region_universe(provider);
            if codes.is_empty() {
                log::debug!(
                    "Suppression {}: no {} regions named, no region class",
                    suppression.id,
                    provider
                );
            } else if universe.iter().all(|code| codes.contains(code)) {
                classified.all_region.push(record(regional));
            } else {
                classified.some_region.push(record(regional));
            }
        }
        Ok(())
    }
}
