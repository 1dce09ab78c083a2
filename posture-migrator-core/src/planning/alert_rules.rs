//! Alert-rule planning: one primary rule (plus splits) per target account.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;

use crate::resolution::{ResolutionEngine, ResolutionSubject};
use crate::synthesis::{RuleContext, RuleSynthesizer, SynthesizedRule};
use crate::types::{AccountGroup, CloudAccount, ExternalAccount, ResolutionResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRulePlan {
    pub cloud_account_id: String,
    pub account_name: String,
    pub account_group_id: String,
    pub resolution: ResolutionResult,
    pub rules: Vec<SynthesizedRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No source account carries this cloud account id.
    NotInSource,
    /// The source account has no team, or no group is named after it.
    NoAccountGroup { team_name: Option<String> },
    /// Neither side knows the account's provider.
    UnknownProvider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAccount {
    pub cloud_account_id: String,
    pub account_name: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertRulePlan {
    pub accounts: Vec<AccountRulePlan>,
    pub skipped: Vec<SkippedAccount>,
}

impl AlertRulePlan {
    pub fn rule_count(&self) -> usize {
        self.accounts.iter().map(|a| a.rules.len()).sum()
    }
}

/// Snapshot slices the planner joins together.
#[derive(Debug, Clone, Copy)]
pub struct AlertRuleInputs<'a> {
    pub cloud_accounts: &'a [CloudAccount],
    pub external_accounts: &'a [ExternalAccount],
    pub account_groups: &'a [AccountGroup],
}

enum Outcome {
    Planned(AccountRulePlan),
    Skipped(SkippedAccount),
}

/// Resolve and synthesize every target account, in parallel.
///
/// Output order follows `inputs.cloud_accounts`.
pub fn plan_alert_rules(
    inputs: AlertRuleInputs<'_>,
    engine: &ResolutionEngine<'_>,
    synthesizer: &RuleSynthesizer,
) -> AlertRulePlan {
    // First source account wins when several share a cloud account id
    let mut by_cloud_id: HashMap<&str, &ExternalAccount> = HashMap::new();
    for external in inputs.external_accounts {
        if !external.cloud_account_id.is_empty() {
            by_cloud_id.entry(external.cloud_account_id.as_str()).or_insert(external);
        }
    }
    let groups_by_name: HashMap<&str, &AccountGroup> = inputs
        .account_groups
        .iter()
        .map(|g| (g.name.as_str(), g))
        .collect();

    let outcomes: Vec<Outcome> = inputs
        .cloud_accounts
        .par_iter()
        .map(|account| plan_account(account, &by_cloud_id, &groups_by_name, engine, synthesizer))
        .collect();

    let mut plan = AlertRulePlan::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Planned(account) => plan.accounts.push(account),
            Outcome::Skipped(skipped) => {
                log::warn!(
                    "Skipping cloud account {} ({}): {}",
                    skipped.account_name,
                    skipped.cloud_account_id,
                    describe(&skipped.reason)
                );
                plan.skipped.push(skipped);
            }
        }
    }
    plan
}

fn plan_account(
    account: &CloudAccount,
    by_cloud_id: &HashMap<&str, &ExternalAccount>,
    groups_by_name: &HashMap<&str, &AccountGroup>,
    engine: &ResolutionEngine<'_>,
    synthesizer: &RuleSynthesizer,
) -> Outcome {
    let skip = |reason| {
        Outcome::Skipped(SkippedAccount {
            cloud_account_id: account.id.clone(),
            account_name: account.name.clone(),
            reason,
        })
    };

    let Some(external) = by_cloud_id.get(account.id.as_str()) else {
        return skip(SkipReason::NotInSource);
    };

    let Some(group) = external
        .team_name
        .as_deref()
        .and_then(|team| groups_by_name.get(team))
    else {
        return skip(SkipReason::NoAccountGroup {
            team_name: external.team_name.clone(),
        });
    };

    let Some(provider) = external.provider.or(account.provider) else {
        return skip(SkipReason::UnknownProvider);
    };

    let resolution = engine.resolve(&ResolutionSubject {
        cloud_account_id: &account.id,
        provider,
        external_account_id: &external.id,
        disabled_signature_ids: &external.disabled_signature_ids,
    });

    let rules = synthesizer.synthesize(
        &RuleContext {
            account_name: &account.name,
            cloud_account_id: &account.id,
            group,
        },
        &resolution,
    );

    Outcome::Planned(AccountRulePlan {
        cloud_account_id: account.id.clone(),
        account_name: account.name.clone(),
        account_group_id: group.id.clone(),
        resolution,
        rules,
    })
}

fn describe(reason: &SkipReason) -> String {
    match reason {
        SkipReason::NotInSource => "not configured in the source".to_string(),
        SkipReason::NoAccountGroup { team_name: Some(team) } => {
            format!("no account group named '{team}'")
        }
        SkipReason::NoAccountGroup { team_name: None } => "source account has no team".to_string(),
        SkipReason::UnknownProvider => "unknown cloud provider".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PolicyCatalog;
    use crate::classification::ClassifiedSuppressions;
    use crate::resolution::ResolutionOptions;
    use crate::types::{CloudProvider, PolicyScope};
    use std::collections::BTreeSet;

    fn catalog() -> PolicyCatalog {
        PolicyCatalog::from_json(
            r#"{"version":"t","providers":{"aws":{"regions":["r1","r2"],"signatures":{"D":["P1"]}}}}"#,
        )
        .unwrap()
    }

    fn external(id: &str, cloud_id: &str, team: Option<&str>, disabled: &[&str]) -> ExternalAccount {
        ExternalAccount {
            id: id.into(),
            name: format!("src-{id}"),
            provider: Some(CloudProvider::Aws),
            cloud_account_id: cloud_id.into(),
            disabled_signature_ids: disabled.iter().map(|s| s.to_string()).collect(),
            team_name: team.map(str::to_string),
        }
    }

    fn cloud(id: &str, name: &str) -> CloudAccount {
        CloudAccount {
            id: id.into(),
            name: name.into(),
            provider: Some(CloudProvider::Aws),
        }
    }

    #[test]
    fn test_plan_and_skip() {
        let catalog = catalog();
        let suppressions = ClassifiedSuppressions::default();
        let universe: BTreeSet<String> = ["P1".to_string(), "P2".to_string()].into();
        let engine = ResolutionEngine::new(&catalog, &suppressions, &universe, ResolutionOptions::default());

        let cloud_accounts = vec![
            cloud("111", "prod"),
            cloud("222", "stray"),
            cloud("333", "orphan"),
            cloud("444", "teamless"),
        ];
        let external_accounts = vec![
            external("1", "111", Some("Payments"), &["D"]),
            external("2", "111", Some("Nobody"), &[]),
            external("3", "333", Some("Nobody"), &[]),
            external("4", "444", None, &[]),
        ];
        let groups = vec![AccountGroup {
            id: "g-1".into(),
            name: "Payments".into(),
            account_ids: vec!["111".into(), "555".into()],
        }];

        let plan = plan_alert_rules(
            AlertRuleInputs {
                cloud_accounts: &cloud_accounts,
                external_accounts: &external_accounts,
                account_groups: &groups,
            },
            &engine,
            &RuleSynthesizer::default(),
        );

        assert_eq!(plan.accounts.len(), 1);
        let prod = &plan.accounts[0];
        assert_eq!(prod.account_group_id, "g-1");
        assert_eq!(prod.resolution.policies, PolicyScope::Only(["P2".to_string()].into()));
        assert_eq!(prod.rules[0].request.name, "prod Alert Rule");
        assert_eq!(prod.rules[0].request.target.excluded_accounts, vec!["555".to_string()]);
        assert_eq!(plan.rule_count(), 1);

        let reasons: Vec<_> = plan.skipped.iter().map(|s| s.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::NotInSource,
                SkipReason::NoAccountGroup {
                    team_name: Some("Nobody".into())
                },
                SkipReason::NoAccountGroup { team_name: None },
            ]
        );
    }
}
