//! Source and target API clients.
//!
//! The migration service talks to both systems through the [`SourceApi`] and
//! [`TargetApi`] traits so phases can be exercised against in-memory fakes.

pub mod source;
pub mod target;

use std::collections::BTreeSet;

use async_trait::async_trait;
use posture_migrator_common::ApiResult;

use crate::types::{
    AccountGroup, AccountGroupRequest, AlertRuleRequest, CloudAccount, ExternalAccount, NamedEntity,
    SourceRegion, SourceUser, Suppression, Team, UserRequest, UserRoleRequest,
};

pub use source::{SourceClient, SourceCredentials};
pub use target::{TargetClient, TargetCredentials};

/// How much of an external account to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountDetail {
    /// Name, provider and cloud account id.
    Basic,
    /// Also disabled signatures and the owning team.
    Detailed,
}

/// Read side of the source system.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Number of organizations visible to the credentials.
    async fn organization_count(&self) -> ApiResult<usize>;

    async fn teams(&self) -> ApiResult<Vec<Team>>;

    async fn users(&self) -> ApiResult<Vec<SourceUser>>;

    async fn external_accounts(&self, detail: AccountDetail) -> ApiResult<Vec<ExternalAccount>>;

    /// Regions of supported providers, codes already in target vocabulary.
    async fn regions(&self) -> ApiResult<Vec<SourceRegion>>;

    /// Active suppressions.
    async fn suppressions(&self) -> ApiResult<Vec<Suppression>>;
}

/// Read and write side of the target system.
///
/// Create calls return [`ApiError::AlreadyExists`](posture_migrator_common::ApiError::AlreadyExists)
/// when an asset with the same name exists; callers decide whether to update.
#[async_trait]
pub trait TargetApi: Send + Sync {
    async fn account_groups(&self) -> ApiResult<Vec<AccountGroup>>;

    async fn cloud_accounts(&self) -> ApiResult<Vec<CloudAccount>>;

    /// Every policy id the target knows.
    async fn policy_ids(&self) -> ApiResult<BTreeSet<String>>;

    async fn user_roles(&self) -> ApiResult<Vec<NamedEntity>>;

    /// Existing user logins (emails).
    async fn users(&self) -> ApiResult<Vec<String>>;

    async fn alert_rules(&self) -> ApiResult<Vec<NamedEntity>>;

    async fn create_account_group(&self, request: &AccountGroupRequest) -> ApiResult<()>;

    async fn update_account_group(&self, id: &str, request: &AccountGroupRequest) -> ApiResult<()>;

    async fn create_user_role(&self, request: &UserRoleRequest) -> ApiResult<()>;

    async fn update_user_role(&self, id: &str, request: &UserRoleRequest) -> ApiResult<()>;

    async fn create_user(&self, request: &UserRequest) -> ApiResult<()>;

    async fn update_user(&self, email: &str, request: &UserRequest) -> ApiResult<()>;

    /// Returns the new rule's id when the target reports one.
    async fn create_alert_rule(&self, request: &AlertRuleRequest) -> ApiResult<Option<String>>;

    async fn update_alert_rule(&self, id: &str, request: &AlertRuleRequest) -> ApiResult<()>;
}
