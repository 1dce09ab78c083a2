//! Posture Migrator Service Layer
//!
//! The service holds the source and target clients plus the policy catalog and
//! exposes the high-level operations (plan, migrate) that the CLI drives.

use std::collections::HashMap;

use posture_migrator_common::ApiError;

use crate::catalog::{PolicyCatalog, DEFAULT_GLOBAL_REGION_ID};
use crate::clients::{SourceApi, TargetApi};
use crate::error::{MigrationError, MigrationResult};
use crate::resolution::ResolutionOptions;
use crate::synthesis::SynthesisOptions;
use crate::types::NamedEntity;

/// Which phases a run executes, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSelection {
    pub account_groups: bool,
    pub users_and_roles: bool,
    pub alert_rules: bool,
}

impl Default for PhaseSelection {
    fn default() -> Self {
        Self {
            account_groups: true,
            users_and_roles: true,
            alert_rules: true,
        }
    }
}

/// Whether an existing target asset with the same name gets updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverwriteOptions {
    pub account_groups: bool,
    pub user_roles: bool,
    pub users: bool,
    pub alert_rules: bool,
}

impl Default for OverwriteOptions {
    fn default() -> Self {
        Self {
            account_groups: true,
            user_roles: true,
            users: true,
            alert_rules: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Plan and log every request without writing anything.
    pub dry_run: bool,
    pub phases: PhaseSelection,
    pub overwrite: OverwriteOptions,
    pub resolution: ResolutionOptions,
    pub synthesis: SynthesisOptions,
    /// Source region id of the synthetic global region.
    pub global_region_id: String,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            phases: PhaseSelection::default(),
            overwrite: OverwriteOptions::default(),
            resolution: ResolutionOptions::default(),
            synthesis: SynthesisOptions::default(),
            global_region_id: DEFAULT_GLOBAL_REGION_ID.to_string(),
        }
    }
}

/// Main service struct that holds the API clients and provides business logic operations
pub struct MigrationService<S, T> {
    pub(crate) source: S,
    pub(crate) target: T,
    pub(crate) catalog: PolicyCatalog,
    pub(crate) options: MigrationOptions,
}

impl<S: SourceApi, T: TargetApi> MigrationService<S, T> {
    pub fn new(source: S, target: T, catalog: PolicyCatalog, options: MigrationOptions) -> Self {
        Self {
            source,
            target,
            catalog,
            options,
        }
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    /// Refuse credentials that can see more than one organization.
    pub async fn check_preconditions(&self) -> MigrationResult<()> {
        let organizations = self.source.organization_count().await?;
        if organizations > 1 {
            return Err(MigrationError::precondition(format!(
                "the source credentials see {organizations} organizations; use a key scoped to a single organization"
            )));
        }
        Ok(())
    }

    // plan() method implementation is in plan.rs
    // migrate() method implementation is in apply.rs
}

/// Name → id lookup for create-or-update.
pub(crate) fn ids_by_name(entities: Vec<NamedEntity>) -> HashMap<String, String> {
    entities.into_iter().map(|e| (e.name, e.id)).collect()
}

/// Errors that make every later call pointless.
pub(crate) fn is_fatal(error: &ApiError) -> bool {
    matches!(error, ApiError::Authentication(_) | ApiError::Config(_))
}
