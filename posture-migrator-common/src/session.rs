//! Target-system session state.
//!
//! The target API hands out short-lived tokens. Instead of module-level
//! globals, a [`TargetSession`] value carries the token together with the time
//! it was issued; the client asks it whether a refresh is due and records the
//! new token through [`TargetSession::refresh`].

use chrono::{DateTime, Duration, Utc};

/// Token plus the bookkeeping needed to know when to renew it.
#[derive(Clone)]
pub struct TargetSession {
    token: Option<String>,
    issued_at: Option<DateTime<Utc>>,
    refresh_after: Duration,
}

impl std::fmt::Debug for TargetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSession")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("issued_at", &self.issued_at)
            .field("refresh_after", &self.refresh_after)
            .finish()
    }
}

impl TargetSession {
    /// A session with no token yet; tokens older than `refresh_after` are stale.
    pub fn new(refresh_after: std::time::Duration) -> Self {
        Self {
            token: None,
            issued_at: None,
            refresh_after: Duration::from_std(refresh_after).unwrap_or(Duration::minutes(4)),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// True when no token has been obtained yet.
    pub fn is_anonymous(&self) -> bool {
        self.token.is_none()
    }

    /// True when a (re-)login is required before the next call at `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.issued_at) {
            (Some(_), Some(issued_at)) => issued_at + self.refresh_after <= now,
            _ => true,
        }
    }

    /// Record a freshly issued token.
    pub fn refresh(&mut self, token: impl Into<String>, now: DateTime<Utc>) {
        self.token = Some(token.into());
        self.issued_at = Some(now);
    }

    /// Forget the current token, e.g. after the server rejected it.
    pub fn invalidate(&mut self) {
        self.token = None;
        self.issued_at = None;
    }
}

impl Default for TargetSession {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(4 * 60))
    }
}
