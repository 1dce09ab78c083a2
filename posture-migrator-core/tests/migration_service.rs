//! Service-level tests against in-memory source and target systems.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use posture_migrator_common::{ApiError, ApiResult};
use posture_migrator_core::clients::{AccountDetail, SourceApi, TargetApi};
use posture_migrator_core::types::{
    AccessLevel, AccountGroup, AccountGroupRequest, AlertRuleRequest, CloudAccount, CloudProvider,
    ExternalAccount, NamedEntity, SourceRegion, SourceRole, SourceUser, Suppression, Team, UserRequest,
    UserRoleRequest,
};
use posture_migrator_core::{
    MigrationError, MigrationOptions, MigrationService, OverwriteOptions, PolicyCatalog, SynthesisOptions,
};

const CATALOG: &str = r#"{
    "version": "service-tests",
    "providers": {
        "aws": {
            "regions": ["us-east-1", "us-west-2"],
            "signatures": { "1": ["P1"], "2": ["P2"] }
        }
    }
}"#;

struct FakeSource {
    organizations: usize,
    suppressions: Vec<Suppression>,
}

impl FakeSource {
    fn new() -> Self {
        Self {
            organizations: 1,
            suppressions: Vec::new(),
        }
    }
}

#[async_trait]
impl SourceApi for FakeSource {
    async fn organization_count(&self) -> ApiResult<usize> {
        Ok(self.organizations)
    }

    async fn teams(&self) -> ApiResult<Vec<Team>> {
        Ok(vec![Team {
            id: "t-1".into(),
            name: "Payments".into(),
            external_account_ids: vec!["10".into()],
        }])
    }

    async fn users(&self) -> ApiResult<Vec<SourceUser>> {
        Ok(vec![
            SourceUser {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                access_level: AccessLevel::OrganizationLevel,
                role: SourceRole::Manager,
                time_zone: None,
                team_names: vec![],
            },
            SourceUser {
                first_name: "Grace".into(),
                last_name: "Hopper".into(),
                email: "grace@example.com".into(),
                access_level: AccessLevel::TeamLevel,
                role: SourceRole::Customer,
                time_zone: None,
                team_names: vec!["Payments".into()],
            },
        ])
    }

    async fn external_accounts(&self, detail: AccountDetail) -> ApiResult<Vec<ExternalAccount>> {
        let detailed = detail == AccountDetail::Detailed;
        Ok(vec![ExternalAccount {
            id: "10".into(),
            name: "prod".into(),
            provider: Some(CloudProvider::Aws),
            cloud_account_id: "111".into(),
            disabled_signature_ids: if detailed {
                ["1".to_string()].into()
            } else {
                BTreeSet::new()
            },
            team_name: detailed.then(|| "Payments".to_string()),
        }])
    }

    async fn regions(&self) -> ApiResult<Vec<SourceRegion>> {
        Ok(vec![
            SourceRegion {
                id: "1".into(),
                provider: CloudProvider::Aws,
                code: "us-east-1".into(),
            },
            SourceRegion {
                id: "2".into(),
                provider: CloudProvider::Aws,
                code: "us-west-2".into(),
            },
        ])
    }

    async fn suppressions(&self) -> ApiResult<Vec<Suppression>> {
        Ok(self.suppressions.clone())
    }
}

#[derive(Default)]
struct TargetState {
    groups: Vec<AccountGroup>,
    roles: Vec<(NamedEntity, UserRoleRequest)>,
    users: Vec<UserRequest>,
    rules: Vec<(String, AlertRuleRequest)>,
    /// Rule id and `enabled` flag of every alert-rule update.
    rule_updates: Vec<(String, bool)>,
    writes: usize,
}

#[derive(Default)]
struct FakeTarget {
    state: Arc<Mutex<TargetState>>,
    reject_writes: bool,
    /// Create alert rules without echoing their id.
    hide_rule_ids: bool,
}

impl FakeTarget {
    fn state(&self) -> std::sync::MutexGuard<'_, TargetState> {
        self.state.lock().expect("target state")
    }

    fn write(&self) -> ApiResult<std::sync::MutexGuard<'_, TargetState>> {
        if self.reject_writes {
            return Err(ApiError::Authentication("token revoked".into()));
        }
        let mut state = self.state();
        state.writes += 1;
        Ok(state)
    }
}

#[async_trait]
impl TargetApi for FakeTarget {
    async fn account_groups(&self) -> ApiResult<Vec<AccountGroup>> {
        Ok(self.state().groups.clone())
    }

    async fn cloud_accounts(&self) -> ApiResult<Vec<CloudAccount>> {
        Ok(vec![CloudAccount {
            id: "111".into(),
            name: "prod".into(),
            provider: Some(CloudProvider::Aws),
        }])
    }

    async fn policy_ids(&self) -> ApiResult<BTreeSet<String>> {
        Ok(["P1".to_string(), "P2".to_string(), "P3".to_string()].into())
    }

    async fn user_roles(&self) -> ApiResult<Vec<NamedEntity>> {
        Ok(self.state().roles.iter().map(|(e, _)| e.clone()).collect())
    }

    async fn users(&self) -> ApiResult<Vec<String>> {
        Ok(self.state().users.iter().map(|u| u.email.clone()).collect())
    }

    async fn alert_rules(&self) -> ApiResult<Vec<NamedEntity>> {
        Ok(self
            .state()
            .rules
            .iter()
            .map(|(id, r)| NamedEntity {
                id: id.clone(),
                name: r.name.clone(),
            })
            .collect())
    }

    async fn create_account_group(&self, request: &AccountGroupRequest) -> ApiResult<()> {
        let mut state = self.write()?;
        if state.groups.iter().any(|g| g.name == request.name) {
            return Err(ApiError::AlreadyExists("account_group_name_already_exists".into()));
        }
        let id = format!("g-{}", state.groups.len() + 1);
        state.groups.push(AccountGroup {
            id,
            name: request.name.clone(),
            account_ids: request.account_ids.clone(),
        });
        Ok(())
    }

    async fn update_account_group(&self, id: &str, request: &AccountGroupRequest) -> ApiResult<()> {
        let mut state = self.write()?;
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        group.account_ids = request.account_ids.clone();
        Ok(())
    }

    async fn create_user_role(&self, request: &UserRoleRequest) -> ApiResult<()> {
        let mut state = self.write()?;
        if state.roles.iter().any(|(e, _)| e.name == request.name) {
            return Err(ApiError::AlreadyExists("user_role_name_already_exists".into()));
        }
        let id = format!("role-{}", state.roles.len() + 1);
        state.roles.push((
            NamedEntity {
                id,
                name: request.name.clone(),
            },
            request.clone(),
        ));
        Ok(())
    }

    async fn update_user_role(&self, id: &str, request: &UserRoleRequest) -> ApiResult<()> {
        let mut state = self.write()?;
        let role = state
            .roles
            .iter_mut()
            .find(|(e, _)| e.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        role.1 = request.clone();
        Ok(())
    }

    async fn create_user(&self, request: &UserRequest) -> ApiResult<()> {
        let mut state = self.write()?;
        if state.users.iter().any(|u| u.email == request.email) {
            return Err(ApiError::AlreadyExists("duplicate_user_name".into()));
        }
        state.users.push(request.clone());
        Ok(())
    }

    async fn update_user(&self, email: &str, request: &UserRequest) -> ApiResult<()> {
        let mut state = self.write()?;
        let user = state
            .users
            .iter_mut()
            .find(|u| u.email == email)
            .ok_or_else(|| ApiError::NotFound(email.to_string()))?;
        *user = request.clone();
        Ok(())
    }

    async fn create_alert_rule(&self, request: &AlertRuleRequest) -> ApiResult<Option<String>> {
        let mut state = self.write()?;
        if state.rules.iter().any(|(_, r)| r.name == request.name) {
            return Err(ApiError::AlreadyExists(String::new()));
        }
        let id = format!("rule-{}", state.rules.len() + 1);
        state.rules.push((id.clone(), request.clone()));
        Ok((!self.hide_rule_ids).then_some(id))
    }

    async fn update_alert_rule(&self, id: &str, request: &AlertRuleRequest) -> ApiResult<()> {
        let mut state = self.write()?;
        let rule = state
            .rules
            .iter_mut()
            .find(|(rule_id, _)| rule_id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        rule.1 = request.clone();
        state.rule_updates.push((id.to_string(), request.enabled));
        Ok(())
    }
}

fn service(source: FakeSource, target: FakeTarget, dry_run: bool) -> MigrationService<FakeSource, FakeTarget> {
    MigrationService::new(
        source,
        target,
        PolicyCatalog::from_json(CATALOG).expect("catalog"),
        MigrationOptions {
            dry_run,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let target = FakeTarget::default();
    let state = Arc::clone(&target.state);
    let service = service(FakeSource::new(), target, true);

    let report = service.migrate().await.expect("dry run");

    assert!(report.dry_run);
    assert_eq!(report.account_groups.planned, 1);
    assert_eq!(report.user_roles.planned, 3);
    assert_eq!(report.users.planned, 2);
    // The group was never created, so the account has nowhere to go
    assert_eq!(report.alert_rules.planned, 0);
    assert_eq!(report.skipped_accounts.len(), 1);
    assert_eq!(report.failures(), 0);
    assert_eq!(state.lock().expect("state").writes, 0);
}

#[tokio::test]
async fn test_migration_creates_every_asset() {
    let target = FakeTarget::default();
    let state = Arc::clone(&target.state);
    let service = service(FakeSource::new(), target, false);

    let report = service.migrate().await.expect("migration");

    assert!(!report.dry_run);
    assert_eq!(report.account_groups.created, 1);
    assert_eq!(report.user_roles.created, 3);
    assert_eq!(report.users.created, 2);
    assert_eq!(report.alert_rules.created, 1);
    assert!(report.skipped_accounts.is_empty());

    let state = state.lock().expect("state");
    assert_eq!(state.writes, 7);
    let grace = state
        .users
        .iter()
        .find(|u| u.email == "grace@example.com")
        .expect("grace migrated");
    let personal_role = state
        .roles
        .iter()
        .find(|(entity, _)| entity.name == "Grace Hopper Role")
        .expect("personal role");
    assert_eq!(grace.role_id, personal_role.0.id);
    assert_eq!(grace.time_zone, "America/Los_Angeles");
    assert_eq!(personal_role.1.account_group_ids, vec!["g-1".to_string()]);

    let (_, rule) = &state.rules[0];
    assert!(rule.enabled);
    assert_eq!(rule.policies, vec!["P2".to_string(), "P3".to_string()]);
    assert!(rule.target.regions.is_empty());
}

#[tokio::test]
async fn test_plan_reflects_disabled_signatures() {
    let target = FakeTarget::default();
    target.state().groups.push(AccountGroup {
        id: "g-1".into(),
        name: "Payments".into(),
        account_ids: vec!["111".into()],
    });
    let service = service(FakeSource::new(), target, true);

    let plan = service.plan().await.expect("plan");

    assert_eq!(plan.catalog_version, "service-tests");
    let rules = plan.alert_rules.expect("alert rule phase");
    assert_eq!(rules.accounts.len(), 1);
    let primary = &rules.accounts[0].rules[0].request;
    assert_eq!(primary.name, "prod Alert Rule");
    assert!(!primary.scan_all);
    assert_eq!(primary.policies, vec!["P2".to_string(), "P3".to_string()]);
    assert_eq!(primary.target.account_groups, vec!["g-1".to_string()]);
}

#[tokio::test]
async fn test_rerun_updates_or_keeps_existing_assets() {
    let overwriting = service(FakeSource::new(), FakeTarget::default(), false);
    overwriting.migrate().await.expect("first run");
    let report = overwriting.migrate().await.expect("second run");

    assert_eq!(report.account_groups.updated, 1);
    assert_eq!(report.user_roles.updated, 3);
    assert_eq!(report.users.updated, 2);
    assert_eq!(report.alert_rules.updated, 1);
    assert_eq!(report.failures(), 0);

    let keeping = MigrationService::new(
        FakeSource::new(),
        FakeTarget::default(),
        PolicyCatalog::from_json(CATALOG).expect("catalog"),
        MigrationOptions {
            dry_run: false,
            overwrite: OverwriteOptions {
                account_groups: false,
                user_roles: false,
                users: false,
                alert_rules: false,
            },
            ..Default::default()
        },
    );
    keeping.migrate().await.expect("first run");
    let report = keeping.migrate().await.expect("second run");
    assert_eq!(report.account_groups.existing, 1);
    assert_eq!(report.alert_rules.existing, 1);
    assert_eq!(report.account_groups.updated, 0);
}

#[tokio::test]
async fn test_multiple_organizations_are_refused() {
    let source = FakeSource {
        organizations: 2,
        ..FakeSource::new()
    };
    let service = service(source, FakeTarget::default(), false);

    let error = service.migrate().await.expect_err("call should fail");
    assert!(matches!(error, MigrationError::Precondition(_)), "got {error:?}");
}

#[tokio::test]
async fn test_authentication_failure_aborts_the_run() {
    let target = FakeTarget {
        reject_writes: true,
        ..Default::default()
    };
    let service = service(FakeSource::new(), target, false);

    let error = service.migrate().await.expect_err("call should fail");
    assert!(
        matches!(error, MigrationError::Api(ApiError::Authentication(_))),
        "got {error:?}"
    );
}

#[tokio::test]
async fn test_unknown_suppression_region_fails_the_alert_phase() {
    let source = FakeSource {
        suppressions: vec![Suppression {
            id: "s-1".into(),
            region_ids: ["77".to_string()].into(),
            external_account_ids: ["10".to_string()].into(),
            ..Default::default()
        }],
        ..FakeSource::new()
    };
    let service = service(source, FakeTarget::default(), true);

    let error = service.plan().await.expect_err("call should fail");
    assert!(matches!(error, MigrationError::RegionUniverse(_)), "got {error:?}");
}

/// Signature 2 suppressed in us-east-1 only, so it gets a us-west-2 split rule.
fn source_with_split() -> FakeSource {
    FakeSource {
        suppressions: vec![Suppression {
            id: "s-2".into(),
            region_ids: ["1".to_string()].into(),
            external_account_ids: ["10".to_string()].into(),
            signature_ids: ["2".to_string()].into(),
            ..Default::default()
        }],
        ..FakeSource::new()
    }
}

async fn migrate_with_disabled_splits(hide_rule_ids: bool) {
    let target = FakeTarget {
        hide_rule_ids,
        ..Default::default()
    };
    let state = Arc::clone(&target.state);
    let service = MigrationService::new(
        source_with_split(),
        target,
        PolicyCatalog::from_json(CATALOG).expect("catalog"),
        MigrationOptions {
            dry_run: false,
            synthesis: SynthesisOptions {
                split_rules_start_disabled: true,
            },
            ..Default::default()
        },
    );

    let report = service.migrate().await.expect("migration");
    assert_eq!(report.alert_rules.created, 2);
    assert_eq!(report.failures(), 0);

    let state = state.lock().expect("state");
    let (primary_id, primary) = &state.rules[0];
    assert_eq!(primary.name, "prod Alert Rule");
    assert!(primary.enabled);
    assert_eq!(primary.policies, vec!["P3".to_string()]);

    let (split_id, split) = &state.rules[1];
    assert_eq!(split.name, "prod Alert Rule (Signature 2)");
    assert_eq!(split.policies, vec!["P2".to_string()]);
    assert_eq!(split.target.regions, vec!["us-west-2".to_string()]);
    assert!(!split.enabled);

    assert_eq!(state.rule_updates, vec![(split_id.clone(), false)]);
    assert!(state.rule_updates.iter().all(|(id, _)| id != primary_id));
}

#[tokio::test]
async fn test_split_rules_are_disabled_by_echoed_id() {
    migrate_with_disabled_splits(false).await;
}

#[tokio::test]
async fn test_split_rules_are_disabled_by_name_lookup() {
    migrate_with_disabled_splits(true).await;
}
