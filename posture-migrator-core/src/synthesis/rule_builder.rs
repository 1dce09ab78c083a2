//! Alert-rule request construction.

use serde::Serialize;

use crate::synthesis::naming::{primary_rule_name, split_rule_name};
use crate::types::{
    AccountGroup, AlertRuleRequest, PolicyScope, ResolutionResult, RuleTarget, SplitScope,
    ASSET_DESCRIPTION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SynthesisOptions {
    /// Create split rules, then immediately disable them.
    pub split_rules_start_disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    Primary,
    Split { signature_id: String },
}

/// A ready-to-send rule plus what to do after it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesizedRule {
    pub kind: RuleKind,
    pub request: AlertRuleRequest,
    pub disable_after_create: bool,
}

/// The account a rule set is synthesized for.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub account_name: &'a str,
    pub cloud_account_id: &'a str,
    pub group: &'a AccountGroup,
}

impl RuleContext<'_> {
    /// Target scoped to the owning group, minus every sibling account.
    fn target(&self, regions: Vec<String>) -> RuleTarget {
        RuleTarget {
            account_groups: vec![self.group.id.clone()],
            excluded_accounts: self
                .group
                .account_ids
                .iter()
                .filter(|id| id.as_str() != self.cloud_account_id)
                .cloned()
                .collect(),
            regions,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSynthesizer {
    options: SynthesisOptions,
}

impl RuleSynthesizer {
    pub fn new(options: SynthesisOptions) -> Self {
        Self { options }
    }

    /// Primary rule first, then one rule per split in resolution order.
    pub fn synthesize(&self, context: &RuleContext<'_>, resolution: &ResolutionResult) -> Vec<SynthesizedRule> {
        let mut rules = Vec::with_capacity(1 + resolution.splits.len());
        rules.push(self.primary(context, resolution));
        rules.extend(resolution.splits.iter().map(|split| self.split(context, split)));
        rules
    }

    fn primary(&self, context: &RuleContext<'_>, resolution: &ResolutionResult) -> SynthesizedRule {
        // An empty list on the wire means scan-all, so a rule with nothing
        // left to scan is sent disabled instead.
        let enabled = !resolution.policies.is_empty() && !resolution.enabled_regions.is_empty();
        if !enabled {
            log::warn!(
                "Account {} has no policies or regions left to scan, its rule is created disabled",
                context.account_name
            );
        }

        SynthesizedRule {
            kind: RuleKind::Primary,
            request: rule_request(
                primary_rule_name(context.account_name),
                enabled,
                &resolution.policies,
                context.target(resolution.enabled_regions.region_codes()),
            ),
            disable_after_create: false,
        }
    }

    fn split(&self, context: &RuleContext<'_>, split: &SplitScope) -> SynthesizedRule {
        SynthesizedRule {
            kind: RuleKind::Split {
                signature_id: split.signature_id.clone(),
            },
            request: rule_request(
                split_rule_name(context.account_name, &split.signature_id),
                true,
                &PolicyScope::Only(split.policies.clone()),
                context.target(split.enabled_regions.clone()),
            ),
            disable_after_create: self.options.split_rules_start_disabled,
        }
    }
}

fn rule_request(name: String, enabled: bool, policies: &PolicyScope, target: RuleTarget) -> AlertRuleRequest {
    AlertRuleRequest {
        name,
        description: ASSET_DESCRIPTION.to_string(),
        enabled,
        scan_all: policies.is_all(),
        policies: policies.policy_ids(),
        policy_labels: Vec::new(),
        excluded_policies: Vec::new(),
        target,
        allow_auto_remediate: false,
        delay_notification_ms: 0,
        notification_channels: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegionScope;
    use std::collections::BTreeSet;

    fn group() -> AccountGroup {
        AccountGroup {
            id: "g-1".into(),
            name: "Payments".into(),
            account_ids: vec!["111".into(), "222".into(), "333".into()],
        }
    }

    fn context(group: &AccountGroup) -> RuleContext<'_> {
        RuleContext {
            account_name: "prod",
            cloud_account_id: "111",
            group,
        }
    }

    #[test]
    fn test_scan_all_primary() {
        let group = group();
        let rules = RuleSynthesizer::default().synthesize(&context(&group), &ResolutionResult::scan_all());

        assert_eq!(rules.len(), 1);
        let request = &rules[0].request;
        assert_eq!(request.name, "prod Alert Rule");
        assert!(request.enabled);
        assert!(request.scan_all);
        assert!(request.policies.is_empty());
        assert!(request.target.regions.is_empty());
        assert_eq!(request.target.account_groups, vec!["g-1".to_string()]);
        assert_eq!(
            request.target.excluded_accounts,
            vec!["222".to_string(), "333".to_string()]
        );
    }

    #[test]
    fn test_primary_with_policies_and_regions() {
        let group = group();
        let resolution = ResolutionResult {
            policies: PolicyScope::Only(BTreeSet::from(["P1".to_string(), "P3".to_string()])),
            enabled_regions: RegionScope::Only(vec!["r3".into()]),
            splits: vec![],
        };
        let rules = RuleSynthesizer::default().synthesize(&context(&group), &resolution);
        let request = &rules[0].request;
        assert!(!request.scan_all);
        assert_eq!(request.policies, vec!["P1".to_string(), "P3".to_string()]);
        assert_eq!(request.target.regions, vec!["r3".to_string()]);
    }

    #[test]
    fn test_empty_scopes_produce_disabled_primary() {
        let group = group();
        let no_regions = ResolutionResult {
            policies: PolicyScope::All,
            enabled_regions: RegionScope::Only(vec![]),
            splits: vec![],
        };
        let rules = RuleSynthesizer::default().synthesize(&context(&group), &no_regions);
        assert!(!rules[0].request.enabled);

        let no_policies = ResolutionResult {
            policies: PolicyScope::Only(BTreeSet::new()),
            enabled_regions: RegionScope::All,
            splits: vec![],
        };
        let rules = RuleSynthesizer::default().synthesize(&context(&group), &no_policies);
        assert!(!rules[0].request.enabled);
        assert!(!rules[0].request.scan_all);
    }

    #[test]
    fn test_split_rules() {
        let group = group();
        let resolution = ResolutionResult {
            policies: PolicyScope::Only(BTreeSet::from(["P1".to_string()])),
            enabled_regions: RegionScope::All,
            splits: vec![SplitScope {
                signature_id: "S".into(),
                policies: BTreeSet::from(["P2".to_string()]),
                enabled_regions: vec!["r3".into()],
            }],
        };
        let synthesizer = RuleSynthesizer::new(SynthesisOptions {
            split_rules_start_disabled: true,
        });
        let rules = synthesizer.synthesize(&context(&group), &resolution);

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].kind, RuleKind::Primary);
        assert!(!rules[0].disable_after_create);

        let split = &rules[1];
        assert_eq!(
            split.kind,
            RuleKind::Split {
                signature_id: "S".into()
            }
        );
        assert_eq!(split.request.name, "prod Alert Rule (Signature S)");
        assert_eq!(split.request.policies, vec!["P2".to_string()]);
        assert_eq!(split.request.target.regions, vec!["r3".to_string()]);
        assert!(!split.request.scan_all);
        assert!(split.request.enabled);
        assert!(split.disable_after_create);
    }
}
