//! Posture Migrator CLI
//!
//! Plans and applies the migration of source teams, users, disabled
//! signatures and suppressions into target account groups, user roles, users
//! and per-account alert rules.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use posture_migrator_core::clients::source::DEFAULT_SOURCE_URL;
use posture_migrator_core::clients::target::DEFAULT_TARGET_URL;
use posture_migrator_core::{
    MigrationOptions, MigrationService, PolicyCatalog, SourceClient, SourceCredentials, TargetClient,
    TargetCredentials,
};
use serde::Serialize;

mod config;

use config::FileConfig;

/// Exit code when the run finished but some assets failed to migrate.
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "posture-migrator")]
#[command(version)]
#[command(
    about = "Migrate security-posture configuration from an Evident-style source to a RedLock-style target",
    long_about = None
)]
struct Cli {
    /// TOML file with phase, overwrite, retry and session settings
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Replace the embedded policy catalog with this JSON file
    #[arg(long, value_name = "FILE", global = true)]
    catalog: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the policy catalog in use
    Catalog,

    /// Fetch both systems and print every request a run would send, as JSON
    Plan {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Write the plan to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Run the migration; a dry run unless --apply is given
    Migrate {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Write to the target instead of logging the requests
        #[arg(long)]
        apply: bool,

        /// Do not ask for confirmation before applying
        #[arg(short, long, requires = "apply")]
        yes: bool,
    },
}

#[derive(Args)]
struct ConnectionArgs {
    /// Source API base URL
    #[arg(long, env = "EVIDENT_API_URL")]
    source_url: Option<String>,

    /// Source API public key
    #[arg(long, env = "EVIDENT_PUBLIC_KEY")]
    source_public_key: String,

    /// Source API secret key
    #[arg(long, env = "EVIDENT_SECRET_KEY", hide_env_values = true)]
    source_secret_key: String,

    /// Target API base URL
    #[arg(long, env = "REDLOCK_API_URL")]
    target_url: Option<String>,

    /// Target login user name
    #[arg(long, env = "REDLOCK_USERNAME")]
    target_username: String,

    /// Target login password
    #[arg(long, env = "REDLOCK_PASSWORD", hide_env_values = true)]
    target_password: String,

    /// Target tenant (customer name), when the login spans several
    #[arg(long, env = "REDLOCK_TENANT")]
    target_customer: Option<String>,
}

/// Command-line switches that narrow what the config file enables.
#[derive(Args)]
struct RunArgs {
    /// Skip the account-group phase
    #[arg(long)]
    skip_account_groups: bool,

    /// Skip the user-role and user phase
    #[arg(long)]
    skip_users: bool,

    /// Skip the alert-rule phase
    #[arg(long)]
    skip_alert_rules: bool,

    /// Keep existing target assets instead of updating them
    #[arg(long)]
    no_overwrite: bool,

    /// Create split rules disabled
    #[arg(long)]
    split_rules_disabled: bool,
}

impl RunArgs {
    fn apply_to(&self, options: &mut MigrationOptions) {
        options.phases.account_groups &= !self.skip_account_groups;
        options.phases.users_and_roles &= !self.skip_users;
        options.phases.alert_rules &= !self.skip_alert_rules;
        if self.no_overwrite {
            options.overwrite.account_groups = false;
            options.overwrite.user_roles = false;
            options.overwrite.users = false;
            options.overwrite.alert_rules = false;
        }
        options.synthesis.split_rules_start_disabled |= self.split_rules_disabled;
    }
}

#[derive(Serialize)]
struct CatalogSummary<'a> {
    version: &'a str,
    providers: Vec<ProviderSummary>,
}

#[derive(Serialize)]
struct ProviderSummary {
    provider: String,
    regions: usize,
    signatures: usize,
    global_signatures: usize,
    policies: usize,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn load_catalog(path: Option<&Path>) -> Result<PolicyCatalog> {
    match path {
        Some(path) => {
            PolicyCatalog::from_path(path).with_context(|| format!("Invalid catalog {}", path.display()))
        }
        None => PolicyCatalog::embedded().context("Failed to load the embedded policy catalog"),
    }
}

fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => FileConfig::load(path),
        None => Ok(FileConfig::default()),
    }
}

fn build_service(
    connection: ConnectionArgs,
    config: &FileConfig,
    catalog: PolicyCatalog,
    options: MigrationOptions,
) -> Result<MigrationService<SourceClient, TargetClient>> {
    let source_url = connection
        .source_url
        .or_else(|| config.source.url.clone())
        .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());
    let target_url = connection
        .target_url
        .or_else(|| config.target.url.clone())
        .unwrap_or_else(|| DEFAULT_TARGET_URL.to_string());

    let source = SourceClient::new(
        &source_url,
        SourceCredentials {
            public_key: connection.source_public_key,
            secret_key: connection.source_secret_key,
        },
        config.retry_policy(),
        config.request_timeout(),
    )
    .context("Failed to create the source client")?;

    let target = TargetClient::new(
        &target_url,
        TargetCredentials {
            username: connection.target_username,
            password: connection.target_password,
            customer_name: connection
                .target_customer
                .or_else(|| config.target.customer_name.clone()),
        },
        config.retry_policy(),
        config.request_timeout(),
        config.session_refresh(),
    )
    .context("Failed to create the target client")?;

    log::debug!("Source API: {source_url}, target API: {target_url}");
    Ok(MigrationService::new(source, target, catalog, options))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    match output {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

/// Ask on the terminal; anything but an explicit yes declines.
fn confirm_apply() -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        anyhow::bail!("refusing to apply without a terminal; pass --yes to confirm non-interactively");
    }
    eprint!("This will create and update assets in the target. Continue? [y/N] ");
    std::io::stderr().flush().context("Failed to flush stderr")?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn catalog_summary(catalog: &PolicyCatalog) -> CatalogSummary<'_> {
    CatalogSummary {
        version: catalog.version(),
        providers: catalog
            .providers()
            .map(|(provider, entries)| ProviderSummary {
                provider: provider.to_string(),
                regions: entries.regions().len(),
                signatures: entries.signatures().len(),
                global_signatures: entries.global_signatures().len(),
                policies: entries
                    .signatures()
                    .values()
                    .flatten()
                    .collect::<std::collections::BTreeSet<_>>()
                    .len(),
            })
            .collect(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let catalog = load_catalog(cli.catalog.as_deref())?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Catalog => {
            write_json(&catalog_summary(&catalog), None)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Plan {
            connection,
            run,
            output,
        } => {
            let mut options = config.migration_options(true);
            run.apply_to(&mut options);
            let service = build_service(connection, &config, catalog, options)?;

            let plan = service.plan().await.context("Failed to plan the migration")?;
            write_json(&plan, output.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Migrate {
            connection,
            run,
            apply,
            yes,
        } => {
            if apply && !yes && !confirm_apply()? {
                log::info!("Aborted, nothing was written");
                return Ok(ExitCode::SUCCESS);
            }

            let mut options = config.migration_options(!apply);
            run.apply_to(&mut options);
            let service = build_service(connection, &config, catalog, options)?;

            let report = service.migrate().await.context("Migration failed")?;
            write_json(&report, None)?;

            if report.failures() > 0 {
                log::error!("{} assets failed to migrate", report.failures());
                return Ok(ExitCode::from(EXIT_PARTIAL_FAILURE));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
