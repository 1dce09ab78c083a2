//! Deterministic names for migrated assets.
//!
//! Create-or-update matches existing target assets by name, so every name
//! here must be a pure function of source data.

pub const ALERT_RULE_SUFFIX: &str = "Alert Rule";

pub const SYSTEM_ADMIN_ROLE: &str = "System Admin";
pub const READ_ONLY_SYSTEM_ADMIN_ROLE: &str = "Read Only System Admin";

pub fn primary_rule_name(account_name: &str) -> String {
    format!("{account_name} {ALERT_RULE_SUFFIX}")
}

pub fn split_rule_name(account_name: &str, signature_id: &str) -> String {
    format!("{account_name} {ALERT_RULE_SUFFIX} (Signature {signature_id})")
}

/// Personal role for a team-level user.
pub fn user_role_name(first_name: &str, last_name: &str) -> String {
    format!("{first_name} {last_name} Role")
}
