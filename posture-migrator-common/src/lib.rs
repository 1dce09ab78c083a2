//! Shared plumbing for the Posture Migrator API clients.
//!
//! - [`retry`]: bounded retry with capped exponential backoff and tagged attempts
//! - [`session`]: explicit target-system session state with tracked expiry
//! - [`http`]: the error taxonomy shared by the source and target clients
//!
//! Nothing in this crate knows about suppressions or policies; the resolution
//! engine in `posture-migrator-core` never depends on it.

pub mod http;
pub mod retry;
pub mod session;

pub use http::{classify_transport_error, ApiError, ApiResult};
pub use retry::{retry_with_backoff, Attempt, RetryError, RetryPolicy};
pub use session::TargetSession;
