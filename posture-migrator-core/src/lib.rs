//! This crate provides the core business logic for Posture Migrator:
//! - Policy catalog (source signature → target policies) and region directory
//! - Suppression classification and per-account policy/region resolution
//! - Alert-rule synthesis and per-phase planning
//! - Source and target API clients, and the service that drives a migration
//!

pub mod catalog;
pub mod classification;
pub mod clients;
pub mod commands;
mod error;
pub mod planning;
pub mod resolution;
pub mod synthesis;
pub mod types;

// Re-exports for a small, focused public API
pub use catalog::{PolicyCatalog, RegionDirectory, DEFAULT_GLOBAL_REGION_ID};
pub use classification::{ClassifiedSuppressions, SuppressionClassifier};
pub use clients::{SourceApi, SourceClient, SourceCredentials, TargetApi, TargetClient, TargetCredentials};
pub use commands::{
    MigrationOptions, MigrationPlan, MigrationReport, MigrationService, OverwriteOptions, PhaseReport,
    PhaseSelection,
};
pub use error::{MigrationError, MigrationResult};
pub use resolution::{ResolutionEngine, ResolutionOptions, ResolutionSubject};
pub use synthesis::{RuleSynthesizer, SynthesisOptions, SynthesizedRule};
pub use types::{PolicyScope, RegionScope, ResolutionResult, SplitScope};
