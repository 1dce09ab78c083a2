//! Error types for the migration library.

use posture_migrator_common::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    /// The policy catalog is missing, unparsable or internally inconsistent.
    #[error("Policy catalog error: {0}")]
    Catalog(String),

    /// A suppression references a region the run cannot account for.
    /// Counting it would skew all-region coverage, so the run is rejected.
    #[error("Region universe inconsistency: {0}")]
    RegionUniverse(String),

    /// A source or target API call failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// The run must not proceed (e.g. credentials see several organizations).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type MigrationResult<T> = Result<T, MigrationError>;

impl MigrationError {
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn region_universe(msg: impl Into<String>) -> Self {
        Self::RegionUniverse(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }
}
