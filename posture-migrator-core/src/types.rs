//! Domain types shared by the engine, the planners and the API clients.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Cloud providers the migration understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
}

impl CloudProvider {
    /// Parse a provider name from either vocabulary (`amazon`/`aws`, `azure`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "amazon" | "aws" => Some(Self::Aws),
            "azure" => Some(Self::Azure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Source-system records
// ---------------------------------------------------------------------------

/// An override rule fetched from the source system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub id: String,
    /// Non-empty for resource-level suppressions, which the engine ignores.
    #[serde(default)]
    pub resource_scope: String,
    #[serde(default)]
    pub region_ids: BTreeSet<String>,
    #[serde(default)]
    pub external_account_ids: BTreeSet<String>,
    /// Empty means the suppression is regional.
    #[serde(default)]
    pub signature_ids: BTreeSet<String>,
    #[serde(default)]
    pub custom_signature_ids: BTreeSet<String>,
}

/// A source region, already translated to the target's region code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegion {
    pub id: String,
    pub provider: CloudProvider,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub external_account_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    OrganizationLevel,
    TeamLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Manager,
    Customer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub access_level: AccessLevel,
    pub role: SourceRole,
    pub time_zone: Option<String>,
    /// Team names; only meaningful for team-level users.
    #[serde(default)]
    pub team_names: Vec<String>,
}

/// A cloud account as registered in the source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub id: String,
    pub name: String,
    pub provider: Option<CloudProvider>,
    /// AWS account number or Azure subscription id; joins to the target's cloud account id.
    pub cloud_account_id: String,
    #[serde(default)]
    pub disabled_signature_ids: BTreeSet<String>,
    pub team_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Target-system records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudAccount {
    pub id: String,
    pub name: String,
    pub provider: Option<CloudProvider>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub account_ids: Vec<String>,
}

/// Any named target entity that create-or-update logic matches by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntity {
    pub id: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Resolution output
// ---------------------------------------------------------------------------

/// Which policies a rule scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "policies", rename_all = "snake_case")]
pub enum PolicyScope {
    /// Nothing excluded: the target's scan-all mode.
    All,
    /// An explicit policy list. Empty means every policy was excluded.
    Only(BTreeSet<String>),
}

impl PolicyScope {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Policy ids to send on the wire; empty for scan-all.
    pub fn policy_ids(&self) -> Vec<String> {
        match self {
            Self::All => Vec::new(),
            Self::Only(ids) => ids.iter().cloned().collect(),
        }
    }

    /// True when the scope can never match a policy.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(ids) if ids.is_empty())
    }
}

/// Which regions a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "regions", rename_all = "snake_case")]
pub enum RegionScope {
    /// Every region of the provider.
    All,
    /// An explicit list in universe order. Empty means no region is left.
    Only(Vec<String>),
}

impl RegionScope {
    pub fn region_codes(&self) -> Vec<String> {
        match self {
            Self::All => Vec::new(),
            Self::Only(codes) => codes.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(codes) if codes.is_empty())
    }

    /// Codes in effect, materialising `All` against the provider universe.
    pub fn effective<'a>(&'a self, universe: &'a [String]) -> &'a [String] {
        match self {
            Self::All => universe,
            Self::Only(codes) => codes,
        }
    }
}

/// A narrower rule re-enabling one signature where it was not suppressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitScope {
    pub signature_id: String,
    pub policies: BTreeSet<String>,
    /// Never empty; in universe order.
    pub enabled_regions: Vec<String>,
}

/// The engine's answer for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub policies: PolicyScope,
    pub enabled_regions: RegionScope,
    pub splits: Vec<SplitScope>,
}

impl ResolutionResult {
    /// The untouched result: scan everything, everywhere.
    pub fn scan_all() -> Self {
        Self {
            policies: PolicyScope::All,
            enabled_regions: RegionScope::All,
            splits: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Target write requests
// ---------------------------------------------------------------------------

pub const ASSET_DESCRIPTION: &str = "Created by Posture Migrator.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountGroupRequest {
    pub name: String,
    pub description: String,
    pub account_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleType {
    #[serde(rename = "System Admin")]
    SystemAdmin,
    #[serde(rename = "Account Group Admin")]
    AccountGroupAdmin,
    #[serde(rename = "Account Group Read Only")]
    AccountGroupReadOnly,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemAdmin => "System Admin",
            Self::AccountGroupAdmin => "Account Group Admin",
            Self::AccountGroupReadOnly => "Account Group Read Only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleRequest {
    pub name: String,
    pub description: String,
    pub role_type: RoleType,
    pub account_group_ids: Vec<String>,
}

/// A user to create; the role is named here and resolved to an id at apply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPlan {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub time_zone: String,
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub time_zone: String,
    pub role_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTarget {
    pub account_groups: Vec<String>,
    pub excluded_accounts: Vec<String>,
    pub regions: Vec<String>,
    pub tags: Vec<BTreeMap<String, String>>,
}

/// Body of an alert-rule create or update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRuleRequest {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub scan_all: bool,
    pub policies: Vec<String>,
    pub policy_labels: Vec<String>,
    pub excluded_policies: Vec<String>,
    pub target: RuleTarget,
    pub allow_auto_remediate: bool,
    pub delay_notification_ms: u64,
    pub notification_channels: Vec<String>,
}
