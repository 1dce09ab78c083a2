//! User-role and user planning.
//!
//! Organization-level users share two fixed roles. Team-level users each get
//! a personal role scoped to the account groups named after their teams.

use std::collections::HashMap;

use serde::Serialize;

use crate::synthesis::naming::{user_role_name, READ_ONLY_SYSTEM_ADMIN_ROLE, SYSTEM_ADMIN_ROLE};
use crate::types::{
    AccessLevel, AccountGroup, RoleType, SourceRole, SourceUser, UserPlan, UserRoleRequest,
    ASSET_DESCRIPTION,
};

/// Time zone every migrated user is created with.
pub const DEFAULT_TIME_ZONE: &str = "America/Los_Angeles";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserMigrationPlan {
    /// Roles in creation order; users reference them by name.
    pub roles: Vec<UserRoleRequest>,
    pub users: Vec<UserPlan>,
}

pub fn plan_users(users: &[SourceUser], groups: &[AccountGroup]) -> UserMigrationPlan {
    let mut plan = UserMigrationPlan::default();
    let mut role_index: HashMap<String, usize> = HashMap::new();

    // A repeated role name widens the planned role to the union of groups
    let mut add_role = |plan: &mut UserMigrationPlan, request: UserRoleRequest| {
        if let Some(&index) = role_index.get(&request.name) {
            log::debug!("Role {} already planned, merging account groups", request.name);
            let planned = &mut plan.roles[index];
            for group_id in request.account_group_ids {
                if !planned.account_group_ids.contains(&group_id) {
                    planned.account_group_ids.push(group_id);
                }
            }
        } else {
            role_index.insert(request.name.clone(), plan.roles.len());
            plan.roles.push(request);
        }
    };

    add_role(
        &mut plan,
        role_request(SYSTEM_ADMIN_ROLE.to_string(), RoleType::SystemAdmin, Vec::new()),
    );
    add_role(
        &mut plan,
        role_request(
            READ_ONLY_SYSTEM_ADMIN_ROLE.to_string(),
            RoleType::AccountGroupReadOnly,
            groups.iter().map(|g| g.id.clone()).collect(),
        ),
    );

    for user in users {
        let role_name = match (user.access_level, user.role) {
            (AccessLevel::OrganizationLevel, SourceRole::Manager) => SYSTEM_ADMIN_ROLE.to_string(),
            (AccessLevel::OrganizationLevel, SourceRole::Customer) => READ_ONLY_SYSTEM_ADMIN_ROLE.to_string(),
            (AccessLevel::TeamLevel, role) => {
                let role_type = match role {
                    SourceRole::Manager => RoleType::AccountGroupAdmin,
                    SourceRole::Customer => RoleType::AccountGroupReadOnly,
                };
                let name = user_role_name(&user.first_name, &user.last_name);
                add_role(
                    &mut plan,
                    role_request(name.clone(), role_type, group_ids_for_teams(&user.team_names, groups)),
                );
                name
            }
        };

        plan.users.push(UserPlan {
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            role_name,
        });
    }

    plan
}

fn role_request(name: String, role_type: RoleType, account_group_ids: Vec<String>) -> UserRoleRequest {
    UserRoleRequest {
        name,
        description: ASSET_DESCRIPTION.to_string(),
        role_type,
        account_group_ids,
    }
}

fn group_ids_for_teams(team_names: &[String], groups: &[AccountGroup]) -> Vec<String> {
    team_names
        .iter()
        .filter_map(|team| groups.iter().find(|g| &g.name == team))
        .map(|g| g.id.clone())
        .collect()
}
