//! Plan creation logic for the migration service
//!
//! Every phase first fetches a snapshot, then hands it to the pure planners.
//! Phases are planned against the target as it is at that moment, so a real
//! run plans each phase only after the previous one was applied.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::catalog::RegionDirectory;
use crate::classification::{ClassifiedSuppressions, SuppressionClassifier};
use crate::clients::{AccountDetail, SourceApi, TargetApi};
use crate::error::MigrationResult;
use crate::planning::{
    plan_account_groups, plan_alert_rules, plan_users, AlertRuleInputs, AlertRulePlan, UserMigrationPlan,
};
use crate::resolution::ResolutionEngine;
use crate::synthesis::RuleSynthesizer;
use crate::types::{AccountGroupRequest, ExternalAccount};

/// Everything a run would send, per enabled phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub catalog_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_groups: Option<Vec<AccountGroupRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<UserMigrationPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_rules: Option<AlertRulePlan>,
}

impl<S: SourceApi, T: TargetApi> super::service::MigrationService<S, T> {
    /// Plan every enabled phase without writing to the target.
    pub async fn plan(&self) -> MigrationResult<MigrationPlan> {
        self.check_preconditions().await?;
        let phases = self.options.phases;

        let account_groups = if phases.account_groups {
            Some(self.account_group_phase().await?)
        } else {
            None
        };
        let users = if phases.users_and_roles {
            Some(self.user_phase().await?)
        } else {
            None
        };
        let alert_rules = if phases.alert_rules {
            Some(self.alert_rule_phase().await?)
        } else {
            None
        };

        Ok(MigrationPlan {
            catalog_version: self.catalog.version().to_string(),
            account_groups,
            users,
            alert_rules,
        })
    }

    pub(crate) async fn account_group_phase(&self) -> MigrationResult<Vec<AccountGroupRequest>> {
        log::info!("Planning account groups, one for each source team");
        let teams = self.source.teams().await?;
        let external_accounts: BTreeMap<String, ExternalAccount> = self
            .source
            .external_accounts(AccountDetail::Basic)
            .await?
            .into_iter()
            .map(|account| (account.id.clone(), account))
            .collect();
        let cloud_accounts = self.target.cloud_accounts().await?;

        Ok(plan_account_groups(&teams, &external_accounts, &cloud_accounts))
    }

    pub(crate) async fn user_phase(&self) -> MigrationResult<UserMigrationPlan> {
        log::info!("Planning users and user roles");
        let groups = self.target.account_groups().await?;
        let users = self.source.users().await?;

        Ok(plan_users(&users, &groups))
    }

    pub(crate) async fn alert_rule_phase(&self) -> MigrationResult<AlertRulePlan> {
        log::info!("Planning alert rules, one for each cloud account");
        let cloud_accounts = self.target.cloud_accounts().await?;
        let account_groups = self.target.account_groups().await?;
        let external_accounts = self.source.external_accounts(AccountDetail::Detailed).await?;

        let resolution = self.options.resolution;
        let policy_universe = if resolution.apply_disabled_signatures || resolution.apply_suppressions {
            self.target.policy_ids().await?
        } else {
            BTreeSet::new()
        };

        let classified = if resolution.apply_suppressions {
            let directory = RegionDirectory::new(
                self.source.regions().await?,
                self.options.global_region_id.clone(),
            );
            let suppressions = self.source.suppressions().await?;
            SuppressionClassifier::new(&self.catalog, &directory).classify(&suppressions)?
        } else {
            ClassifiedSuppressions::default()
        };

        let engine = ResolutionEngine::new(&self.catalog, &classified, &policy_universe, resolution);
        let synthesizer = RuleSynthesizer::new(self.options.synthesis);

        let plan = plan_alert_rules(
            AlertRuleInputs {
                cloud_accounts: &cloud_accounts,
                external_accounts: &external_accounts,
                account_groups: &account_groups,
            },
            &engine,
            &synthesizer,
        );
        log::info!(
            "Planned {} alert rules for {} accounts ({} skipped)",
            plan.rule_count(),
            plan.accounts.len(),
            plan.skipped.len()
        );
        Ok(plan)
    }
}
