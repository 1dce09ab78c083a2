//! Optional TOML run configuration.
//!
//! Every key is optional; a missing file section keeps the defaults of
//! [`MigrationOptions`]. Credentials never come from this file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use posture_migrator_common::RetryPolicy;
use posture_migrator_core::{
    MigrationOptions, OverwriteOptions, PhaseSelection, ResolutionOptions, SynthesisOptions,
    DEFAULT_GLOBAL_REGION_ID,
};
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source: EndpointSection,
    pub target: TargetSection,
    pub phases: PhasesSection,
    pub overwrite: OverwriteSection,
    pub resolution: ResolutionSection,
    pub retry: RetrySection,
    pub session: SessionSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointSection {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetSection {
    pub url: Option<String>,
    /// Tenant sent with the login request.
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhasesSection {
    pub account_groups: bool,
    pub users_and_roles: bool,
    pub alert_rules: bool,
}

impl Default for PhasesSection {
    fn default() -> Self {
        let defaults = PhaseSelection::default();
        Self {
            account_groups: defaults.account_groups,
            users_and_roles: defaults.users_and_roles,
            alert_rules: defaults.alert_rules,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverwriteSection {
    pub account_groups: bool,
    pub user_roles: bool,
    pub users: bool,
    pub alert_rules: bool,
}

impl Default for OverwriteSection {
    fn default() -> Self {
        let defaults = OverwriteOptions::default();
        Self {
            account_groups: defaults.account_groups,
            user_roles: defaults.user_roles,
            users: defaults.users,
            alert_rules: defaults.alert_rules,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolutionSection {
    pub apply_disabled_signatures: bool,
    pub apply_suppressions: bool,
    pub split_rules_start_disabled: bool,
    pub global_region_id: String,
}

impl Default for ResolutionSection {
    fn default() -> Self {
        let resolution = ResolutionOptions::default();
        Self {
            apply_disabled_signatures: resolution.apply_disabled_signatures,
            apply_suppressions: resolution.apply_suppressions,
            split_rules_start_disabled: SynthesisOptions::default().split_rules_start_disabled,
            global_region_id: DEFAULT_GLOBAL_REGION_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_secs: policy.initial_delay.as_secs_f64(),
            max_delay_secs: policy.max_delay.as_secs_f64(),
            multiplier: policy.multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Log in again after this many minutes.
    pub refresh_minutes: u64,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            refresh_minutes: 4,
            timeout_secs: 60,
        }
    }
}

/// Upper bound for any configured delay or timeout.
const MAX_SECS: f64 = 24.0 * 60.0 * 60.0;

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        let in_range = |value: f64| (0.0..=MAX_SECS).contains(&value);
        anyhow::ensure!(
            in_range(retry.initial_delay_secs) && in_range(retry.max_delay_secs),
            "retry delays must be between 0 and {MAX_SECS} seconds"
        );
        anyhow::ensure!(
            retry.multiplier.is_finite() && retry.multiplier >= 1.0,
            "retry multiplier must be at least 1.0"
        );
        anyhow::ensure!(
            self.session.timeout_secs > 0 && self.session.timeout_secs as f64 <= MAX_SECS,
            "session timeout must be between 1 and {MAX_SECS} seconds"
        );
        anyhow::ensure!(
            self.session.refresh_minutes.saturating_mul(60) as f64 <= MAX_SECS,
            "session refresh must be at most {} minutes",
            MAX_SECS / 60.0
        );
        anyhow::ensure!(
            !self.resolution.global_region_id.trim().is_empty(),
            "global_region_id must not be empty"
        );
        Ok(())
    }

    /// Options for a run; `dry_run` comes from the command line.
    pub fn migration_options(&self, dry_run: bool) -> MigrationOptions {
        MigrationOptions {
            dry_run,
            phases: PhaseSelection {
                account_groups: self.phases.account_groups,
                users_and_roles: self.phases.users_and_roles,
                alert_rules: self.phases.alert_rules,
            },
            overwrite: OverwriteOptions {
                account_groups: self.overwrite.account_groups,
                user_roles: self.overwrite.user_roles,
                users: self.overwrite.users,
                alert_rules: self.overwrite.alert_rules,
            },
            resolution: ResolutionOptions {
                apply_disabled_signatures: self.resolution.apply_disabled_signatures,
                apply_suppressions: self.resolution.apply_suppressions,
            },
            synthesis: SynthesisOptions {
                split_rules_start_disabled: self.resolution.split_rules_start_disabled,
            },
            global_region_id: self.resolution.global_region_id.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: secs(self.retry.initial_delay_secs),
            max_delay: secs(self.retry.max_delay_secs),
            multiplier: self.retry.multiplier,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.session.timeout_secs)
    }

    pub fn session_refresh(&self) -> Duration {
        Duration::from_secs(self.session.refresh_minutes.saturating_mul(60))
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::from_secs_f64(MAX_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_keeps_defaults() {
        let config = FileConfig::parse("").expect("empty config");
        assert_eq!(config, FileConfig::default());
        assert_eq!(config.migration_options(true), MigrationOptions::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.session_refresh(), Duration::from_secs(240));
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = FileConfig::parse(
            r#"
            [target]
            customer_name = "Acme"

            [phases]
            users_and_roles = false

            [overwrite]
            alert_rules = false

            [resolution]
            apply_suppressions = false
            split_rules_start_disabled = true
            global_region_id = "42"

            [retry]
            max_attempts = 2
            initial_delay_secs = 0.5
            "#,
        )
        .expect("config");

        assert_eq!(config.target.customer_name.as_deref(), Some("Acme"));
        let options = config.migration_options(false);
        assert!(!options.dry_run);
        assert!(options.phases.account_groups);
        assert!(!options.phases.users_and_roles);
        assert!(!options.overwrite.alert_rules);
        assert!(options.overwrite.users);
        assert!(!options.resolution.apply_suppressions);
        assert!(options.resolution.apply_disabled_signatures);
        assert!(options.synthesis.split_rules_start_disabled);
        assert_eq!(options.global_region_id, "42");

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(FileConfig::parse("[phases]\nalert_rule = true\n").is_err());
        assert!(FileConfig::parse("[credentials]\npassword = \"x\"\n").is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(FileConfig::parse("[retry]\nmultiplier = 0.5\n").is_err());
        assert!(FileConfig::parse("[session]\ntimeout_secs = 0\n").is_err());
        assert!(FileConfig::parse("[resolution]\nglobal_region_id = \" \"\n").is_err());
        assert!(FileConfig::parse("[retry]\ninitial_delay_secs = 1e300\n").is_err());
        assert!(FileConfig::parse("[retry]\nmax_delay_secs = -1.0\n").is_err());
        assert!(FileConfig::parse("[session]\nrefresh_minutes = 9223372036854775807\n").is_err());
    }

    #[test]
    fn test_out_of_range_values_do_not_panic() {
        let mut config = FileConfig::default();
        config.retry.initial_delay_secs = 1e300;
        config.session.refresh_minutes = u64::MAX;

        assert_eq!(config.retry_policy().initial_delay, Duration::from_secs(86_400));
        assert_eq!(config.session_refresh(), Duration::from_secs(u64::MAX));
    }
}
