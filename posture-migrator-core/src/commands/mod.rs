//! Commands module - service layer for migration operations

mod apply;
mod plan;
pub(crate) mod service;

pub use apply::{MigrationReport, PhaseReport};
pub use plan::MigrationPlan;
pub use service::{MigrationOptions, MigrationService, OverwriteOptions, PhaseSelection};
