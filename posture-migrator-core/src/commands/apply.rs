//! Apply logic for the migration service
//!
//! Each phase is planned against the live target, then written with
//! create-or-update semantics: create first, and when the target reports the
//! name as taken, update the existing asset if overwriting is enabled.

use std::collections::HashMap;
use std::future::Future;

use posture_migrator_common::{ApiError, ApiResult};
use serde::Serialize;

use crate::clients::{SourceApi, TargetApi};
use crate::error::MigrationResult;
use crate::planning::{AlertRulePlan, SkippedAccount, UserMigrationPlan};
use crate::synthesis::SynthesizedRule;
use crate::types::{AccountGroupRequest, AlertRuleRequest, UserRequest};

use super::service::{ids_by_name, is_fatal};

/// Counts for one asset kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// Requests a dry run would have sent.
    pub planned: usize,
    pub created: usize,
    pub updated: usize,
    /// Already present and left alone.
    pub existing: usize,
    pub failed: usize,
}

impl PhaseReport {
    fn record<C>(&mut self, outcome: &Upserted<C>) {
        match outcome {
            Upserted::Created(_) => self.created += 1,
            Upserted::Updated(_) => self.updated += 1,
            Upserted::Existing => self.existing += 1,
            Upserted::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub account_groups: PhaseReport,
    pub user_roles: PhaseReport,
    pub users: PhaseReport,
    pub alert_rules: PhaseReport,
    pub skipped_accounts: Vec<SkippedAccount>,
}

impl MigrationReport {
    pub fn failures(&self) -> usize {
        self.account_groups.failed + self.user_roles.failed + self.users.failed + self.alert_rules.failed
    }
}

/// Result of one create-or-update.
#[derive(Debug)]
enum Upserted<C> {
    Created(C),
    /// Updated the asset with this id.
    Updated(String),
    Existing,
    Failed,
}

impl<S: SourceApi, T: TargetApi> super::service::MigrationService<S, T> {
    /// Run every enabled phase. In dry-run mode nothing is written.
    pub async fn migrate(&self) -> MigrationResult<MigrationReport> {
        self.check_preconditions().await?;
        let dry_run = self.options.dry_run;
        if dry_run {
            log::info!("THIS IS A DRY RUN. NO RESOURCES WILL BE CREATED.");
        }

        let mut report = MigrationReport {
            dry_run,
            ..Default::default()
        };
        let phases = self.options.phases;

        if phases.account_groups {
            let groups = self.account_group_phase().await?;
            if dry_run {
                for group in &groups {
                    log_group(group);
                }
                report.account_groups.planned = groups.len();
            } else {
                report.account_groups = self.apply_account_groups(&groups).await?;
            }
        }

        if phases.users_and_roles {
            let plan = self.user_phase().await?;
            if dry_run {
                for role in &plan.roles {
                    log::info!("User Role {} created/updated.", role.name);
                    log::info!("-- Role Type: {}", role.role_type.as_str());
                    log::info!("-- Account Group IDs: {:?}", role.account_group_ids);
                }
                for user in &plan.users {
                    log::info!("User {} created/updated.", user.email);
                    log::info!("-- Name: {} {}", user.first_name, user.last_name);
                }
                report.user_roles.planned = plan.roles.len();
                report.users.planned = plan.users.len();
            } else {
                let (roles, users) = self.apply_users(&plan).await?;
                report.user_roles = roles;
                report.users = users;
            }
        }

        if phases.alert_rules {
            let plan = self.alert_rule_phase().await?;
            if dry_run {
                for account in &plan.accounts {
                    for rule in &account.rules {
                        log_rule("created/updated", &rule.request);
                    }
                }
                report.alert_rules.planned = plan.rule_count();
            } else {
                report.alert_rules = self.apply_alert_rules(&plan).await?;
            }
            report.skipped_accounts = plan.skipped;
        }

        log::info!("Migration completed");
        Ok(report)
    }

    async fn apply_account_groups(&self, groups: &[AccountGroupRequest]) -> MigrationResult<PhaseReport> {
        let overwrite = self.options.overwrite.account_groups;
        let existing: HashMap<String, String> = if overwrite {
            self.target
                .account_groups()
                .await?
                .into_iter()
                .map(|g| (g.name, g.id))
                .collect()
        } else {
            HashMap::new()
        };

        let mut report = PhaseReport::default();
        for group in groups {
            let outcome = upsert(
                "Account Group",
                &group.name,
                overwrite,
                &existing,
                self.target.create_account_group(group),
                move |id| async move { self.target.update_account_group(&id, group).await },
            )
            .await?;
            if matches!(outcome, Upserted::Created(_) | Upserted::Updated(_)) {
                log::info!("-- Cloud Account IDs: {:?}", group.account_ids);
            }
            report.record(&outcome);
        }
        Ok(report)
    }

    async fn apply_users(&self, plan: &UserMigrationPlan) -> MigrationResult<(PhaseReport, PhaseReport)> {
        let overwrite_roles = self.options.overwrite.user_roles;
        let existing_roles = if overwrite_roles {
            ids_by_name(self.target.user_roles().await?)
        } else {
            HashMap::new()
        };

        let mut roles = PhaseReport::default();
        for role in &plan.roles {
            let outcome = upsert(
                "User Role",
                &role.name,
                overwrite_roles,
                &existing_roles,
                self.target.create_user_role(role),
                move |id| async move { self.target.update_user_role(&id, role).await },
            )
            .await?;
            roles.record(&outcome);
        }

        // Role ids are only known once the roles exist
        let role_ids = ids_by_name(self.target.user_roles().await?);

        let overwrite_users = self.options.overwrite.users;
        let existing_users: HashMap<String, String> = if overwrite_users {
            self.target
                .users()
                .await?
                .into_iter()
                .map(|email| (email.clone(), email))
                .collect()
        } else {
            HashMap::new()
        };

        let mut users = PhaseReport::default();
        for user in &plan.users {
            let Some(role_id) = role_ids.get(&user.role_name) else {
                log::warn!("Cannot find User Role {} for user {}, skipping", user.role_name, user.email);
                users.failed += 1;
                continue;
            };
            let request = UserRequest {
                email: user.email.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                time_zone: user.time_zone.clone(),
                role_id: role_id.clone(),
            };
            let request = &request;
            let outcome = upsert(
                "User",
                &user.email,
                overwrite_users,
                &existing_users,
                self.target.create_user(request),
                move |email| async move { self.target.update_user(&email, request).await },
            )
            .await?;
            users.record(&outcome);
        }

        Ok((roles, users))
    }

    async fn apply_alert_rules(&self, plan: &AlertRulePlan) -> MigrationResult<PhaseReport> {
        let overwrite = self.options.overwrite.alert_rules;
        let needs_lookup = overwrite
            || plan
                .accounts
                .iter()
                .flat_map(|a| &a.rules)
                .any(|r| r.disable_after_create);
        let mut existing = if needs_lookup {
            ids_by_name(self.target.alert_rules().await?)
        } else {
            HashMap::new()
        };

        let mut report = PhaseReport::default();
        for account in &plan.accounts {
            for rule in &account.rules {
                let request = &rule.request;
                let outcome = upsert(
                    "Alert Rule",
                    &request.name,
                    overwrite,
                    &existing,
                    self.target.create_alert_rule(request),
                    move |id| async move { self.target.update_alert_rule(&id, request).await },
                )
                .await?;
                if matches!(outcome, Upserted::Created(_) | Upserted::Updated(_)) {
                    log_rule_scope(request);
                }
                report.record(&outcome);

                if rule.disable_after_create {
                    self.disable_rule(rule, &outcome, &mut existing).await?;
                }
            }
        }
        Ok(report)
    }

    /// Switch a freshly written split rule off.
    async fn disable_rule(
        &self,
        rule: &SynthesizedRule,
        outcome: &Upserted<Option<String>>,
        known: &mut HashMap<String, String>,
    ) -> MigrationResult<()> {
        let name = &rule.request.name;
        let id = match outcome {
            Upserted::Created(Some(id)) | Upserted::Updated(id) => Some(id.clone()),
            Upserted::Created(None) => {
                // Create did not echo the id; look it up by name
                *known = ids_by_name(self.target.alert_rules().await?);
                known.get(name).cloned()
            }
            Upserted::Existing | Upserted::Failed => None,
        };
        let Some(id) = id else {
            if matches!(outcome, Upserted::Created(None)) {
                log::warn!("Cannot find Alert Rule {name} to disable");
            }
            return Ok(());
        };

        let disabled = AlertRuleRequest {
            enabled: false,
            ..rule.request.clone()
        };
        match self.target.update_alert_rule(&id, &disabled).await {
            Ok(()) => {
                log::info!("Alert Rule {name} disabled.");
                Ok(())
            }
            Err(e) if is_fatal(&e) => Err(e.into()),
            Err(e) => {
                log::error!("Failed to disable Alert Rule {name}: {e}");
                Ok(())
            }
        }
    }
}

/// Create, or update by name when the target reports a conflict.
async fn upsert<C, CF, U, UF>(
    kind: &str,
    name: &str,
    overwrite: bool,
    existing: &HashMap<String, String>,
    create: CF,
    update: U,
) -> MigrationResult<Upserted<C>>
where
    CF: Future<Output = ApiResult<C>>,
    U: FnOnce(String) -> UF,
    UF: Future<Output = ApiResult<()>>,
{
    match create.await {
        Ok(created) => {
            log::info!("{kind} {name} created.");
            Ok(Upserted::Created(created))
        }
        Err(ApiError::AlreadyExists(_)) if !overwrite => {
            log::info!("{kind} {name} already exists.");
            Ok(Upserted::Existing)
        }
        Err(ApiError::AlreadyExists(_)) => {
            let Some(id) = existing.get(name).cloned() else {
                log::warn!("Cannot find {kind} {name} to update");
                return Ok(Upserted::Failed);
            };
            match update(id.clone()).await {
                Ok(()) => {
                    log::info!("{kind} {name} updated.");
                    Ok(Upserted::Updated(id))
                }
                Err(e) => failure(kind, name, e),
            }
        }
        Err(e) => failure(kind, name, e),
    }
}

fn failure<C>(kind: &str, name: &str, error: ApiError) -> MigrationResult<Upserted<C>> {
    if is_fatal(&error) {
        return Err(error.into());
    }
    log::error!("{kind} {name} failed: {error}");
    Ok(Upserted::Failed)
}

fn log_group(group: &AccountGroupRequest) {
    log::info!("Account Group {} created/updated.", group.name);
    log::info!("-- Cloud Account IDs: {:?}", group.account_ids);
}

fn log_rule(verb: &str, request: &AlertRuleRequest) {
    log::info!("Alert Rule {} {verb}.", request.name);
    log_rule_scope(request);
}

fn log_rule_scope(request: &AlertRuleRequest) {
    if request.scan_all {
        log::info!("-- Policies: All");
    } else {
        log::info!("-- Policies: {}", request.policies.len());
    }
    if request.target.regions.is_empty() {
        log::info!("-- Regions: All");
    } else {
        log::info!("-- Regions: {}", request.target.regions.len());
    }
    if !request.enabled {
        log::info!("-- Disabled");
    }
}
