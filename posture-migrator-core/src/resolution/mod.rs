//! Per-account policy and region resolution.
//!
//! The engine folds an account's disabled signatures and the classified
//! suppressions that name it into one primary (policies, regions) pair plus
//! zero or more split pairs. Steps run in a fixed order and each one works on
//! what the previous steps left:
//!
//! 1. start from every target policy in every region
//! 2. drop the policies of the account's disabled signatures
//! 3. narrow the regions by regional suppressions
//! 4. drop global signatures suppressed in the global region
//! 5. drop signatures suppressed in every region
//! 6. carve a split rule for signatures suppressed in some regions
//! 7. collapse an untouched policy set back to scan-all
//!
//! Resolution is pure: it never fails and never performs I/O.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::PolicyCatalog;
use crate::classification::ClassifiedSuppressions;
use crate::types::{CloudProvider, PolicyScope, RegionScope, ResolutionResult, SplitScope};

/// Switches for the optional resolution steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionOptions {
    /// Step 2.
    pub apply_disabled_signatures: bool,
    /// Steps 3 to 6.
    pub apply_suppressions: bool,
}

impl Default for ResolutionOptions {
    fn default() -> Self {
        Self {
            apply_disabled_signatures: true,
            apply_suppressions: true,
        }
    }
}

/// The account a resolution is computed for.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionSubject<'a> {
    pub cloud_account_id: &'a str,
    pub provider: CloudProvider,
    /// Source-side id that suppressions are scoped by.
    pub external_account_id: &'a str,
    pub disabled_signature_ids: &'a BTreeSet<String>,
}

pub struct ResolutionEngine<'a> {
    catalog: &'a PolicyCatalog,
    suppressions: &'a ClassifiedSuppressions,
    policy_universe: &'a BTreeSet<String>,
    options: ResolutionOptions,
}

impl<'a> ResolutionEngine<'a> {
    pub fn new(
        catalog: &'a PolicyCatalog,
        suppressions: &'a ClassifiedSuppressions,
        policy_universe: &'a BTreeSet<String>,
        options: ResolutionOptions,
    ) -> Self {
        Self {
            catalog,
            suppressions,
            policy_universe,
            options,
        }
    }

    pub fn resolve(&self, subject: &ResolutionSubject<'_>) -> ResolutionResult {
        let universe = self.catalog.region_universe(subject.provider);
        let mut policies = self.policy_universe.clone();
        let mut regions = RegionScope::All;
        let mut splits = Vec::new();

        if self.options.apply_disabled_signatures {
            for signature_id in subject.disabled_signature_ids {
                self.remove_signature(&mut policies, subject.provider, signature_id);
            }
        }

        if self.options.apply_suppressions {
            regions = self.regional_scope(subject, universe);
            self.remove_global_signatures(&mut policies, subject);
            self.remove_all_region_signatures(&mut policies, subject);
            splits = self.split_some_region_signatures(&mut policies, subject, regions.effective(universe));
        }

        let policies = if policies.len() == self.policy_universe.len() {
            PolicyScope::All
        } else {
            PolicyScope::Only(policies)
        };

        log::trace!(
            "Resolved account {}: {} policies, {} regions, {} splits",
            subject.cloud_account_id,
            match &policies {
                PolicyScope::All => "all".to_string(),
                PolicyScope::Only(ids) => ids.len().to_string(),
            },
            match &regions {
                RegionScope::All => "all".to_string(),
                RegionScope::Only(codes) => codes.len().to_string(),
            },
            splits.len()
        );

        ResolutionResult {
            policies,
            enabled_regions: regions,
            splits,
        }
    }

    fn remove_signature(&self, policies: &mut BTreeSet<String>, provider: CloudProvider, signature_id: &str) {
        match self.catalog.policies_for(provider, signature_id) {
            Some(mapped) => {
                for policy_id in mapped {
                    policies.remove(policy_id);
                }
            }
            None => log::debug!("Signature {signature_id} has no {provider} policy mapping"),
        }
    }

    fn regional_scope(&self, subject: &ResolutionSubject<'_>, universe: &[String]) -> RegionScope {
        let suppressed: BTreeSet<&String> = self
            .suppressions
            .regional
            .iter()
            .filter(|s| s.applies_to(subject.external_account_id))
            .filter_map(|s| s.coverage.codes_for(subject.provider))
            .flatten()
            .collect();

        if suppressed.is_empty() {
            return RegionScope::All;
        }

        RegionScope::Only(
            universe
                .iter()
                .filter(|code| !suppressed.contains(code))
                .cloned()
                .collect(),
        )
    }

    fn remove_global_signatures(&self, policies: &mut BTreeSet<String>, subject: &ResolutionSubject<'_>) {
        for suppression in &self.suppressions.global_signature {
            if !suppression.covers_global_region
                || !suppression.applies_to(subject.external_account_id, subject.provider)
            {
                continue;
            }
            for signature_id in &suppression.signature_ids {
                self.remove_signature(policies, subject.provider, signature_id);
            }
        }
    }

    fn remove_all_region_signatures(&self, policies: &mut BTreeSet<String>, subject: &ResolutionSubject<'_>) {
        for suppression in &self.suppressions.all_region {
            if !suppression.applies_to(subject.external_account_id, subject.provider) {
                continue;
            }
            for signature_id in &suppression.signature_ids {
                self.remove_signature(policies, subject.provider, signature_id);
            }
        }
    }

    fn split_some_region_signatures(
        &self,
        policies: &mut BTreeSet<String>,
        subject: &ResolutionSubject<'_>,
        enabled: &[String],
    ) -> Vec<SplitScope> {
        let mut suppressed_in: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for suppression in &self.suppressions.some_region {
            if !suppression.applies_to(subject.external_account_id, subject.provider) {
                continue;
            }
            for signature_id in &suppression.signature_ids {
                let codes = suppressed_in.entry(signature_id.as_str()).or_default();
                codes.extend(
                    suppression
                        .region_codes
                        .iter()
                        .filter(|code| enabled.contains(*code))
                        .map(String::as_str),
                );
            }
        }

        // Membership is judged against what steps 2 to 5 left, so two
        // signatures sharing a policy both get their split.
        let surviving = policies.clone();
        let mut splits = Vec::new();

        for (signature_id, codes) in suppressed_in {
            if codes.is_empty() {
                continue;
            }
            let Some(mapped) = self.catalog.policies_for(subject.provider, signature_id) else {
                continue;
            };
            let split_policies: BTreeSet<String> = mapped.intersection(&surviving).cloned().collect();
            if split_policies.is_empty() {
                log::trace!("Signature {signature_id} already removed, no split");
                continue;
            }

            for policy_id in &split_policies {
                policies.remove(policy_id);
            }

            let split_regions: Vec<String> = enabled
                .iter()
                .filter(|code| !codes.contains(code.as_str()))
                .cloned()
                .collect();
            if split_regions.is_empty() {
                log::trace!("Signature {signature_id} suppressed in every enabled region, no split");
                continue;
            }

            splits.push(SplitScope {
                signature_id: signature_id.to_string(),
                policies: split_policies,
                enabled_regions: split_regions,
            });
        }

        splits
    }
}
