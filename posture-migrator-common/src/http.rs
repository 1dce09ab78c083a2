//! Error taxonomy shared by the source and target API clients.

use thiserror::Error;

use crate::retry::Attempt;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Rate limited by {0}")]
    RateLimited(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Request signing failed: {0}")]
    Signing(String),
    #[error("Client configuration error: {0}")]
    Config(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Transient failures worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited(_) => true,
            Self::Status { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// Convert a single-call result into a retry [`Attempt`].
    pub fn into_attempt<T>(result: ApiResult<T>) -> Attempt<T, ApiError> {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) if e.is_retryable() => Attempt::Retryable(e),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

/// Map a transport-level `reqwest` failure onto [`ApiError`].
pub fn classify_transport_error(error: &reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout(error.to_string())
    } else if error.is_connect() {
        ApiError::Connection(error.to_string())
    } else if error.is_decode() {
        ApiError::InvalidResponse(error.to_string())
    } else {
        ApiError::Connection(error.to_string())
    }
}
