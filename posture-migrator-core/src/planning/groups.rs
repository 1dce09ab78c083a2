//! Account-group planning: one group per source team.

use std::collections::{BTreeMap, HashSet};

use crate::types::{AccountGroupRequest, CloudAccount, ExternalAccount, Team, ASSET_DESCRIPTION};

/// Build one group request per team, holding the target ids of the team's
/// accounts that the target already knows about.
pub fn plan_account_groups(
    teams: &[Team],
    external_accounts: &BTreeMap<String, ExternalAccount>,
    cloud_accounts: &[CloudAccount],
) -> Vec<AccountGroupRequest> {
    let known: HashSet<&str> = cloud_accounts.iter().map(|a| a.id.as_str()).collect();

    teams
        .iter()
        .map(|team| {
            let mut account_ids = Vec::new();
            for external_id in &team.external_account_ids {
                let Some(external) = external_accounts.get(external_id) else {
                    log::debug!("Team {}: external account {} not found", team.name, external_id);
                    continue;
                };
                let cloud_id = external.cloud_account_id.as_str();
                if cloud_id.is_empty() || !known.contains(cloud_id) {
                    log::debug!(
                        "Team {}: account {} is not onboarded in the target",
                        team.name,
                        external.name
                    );
                    continue;
                }
                if !account_ids.iter().any(|id| id == cloud_id) {
                    account_ids.push(cloud_id.to_string());
                }
            }

            AccountGroupRequest {
                name: team.name.clone(),
                description: ASSET_DESCRIPTION.to_string(),
                account_ids,
            }
        })
        .collect()
}
