//! Pure planners for each migration phase.
//!
//! Planners only join snapshot data and never talk to an API, so dry runs and
//! real runs share the exact same requests.

pub mod alert_rules;
pub mod groups;
pub mod users;

pub use alert_rules::{
    plan_alert_rules, AccountRulePlan, AlertRuleInputs, AlertRulePlan, SkipReason, SkippedAccount,
};
pub use groups::plan_account_groups;
pub use users::{plan_users, UserMigrationPlan, DEFAULT_TIME_ZONE};
