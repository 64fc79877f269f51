//! Limiter inputs and outcomes.

use std::time::Duration;

use crate::error::{PubgateError, Result};

use super::window::FixedWindow;

/// One admission question: may `identity` perform `action` now?
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRequest {
    /// Caller-defined namespace of the quota
    pub action: String,
    /// Caller key within the action's namespace. Never hashed here.
    pub identity: String,
    /// Inclusive maximum of admitted requests per window
    pub limit: u64,
    /// Window length in seconds
    pub window_seconds: u64,
}

impl RateLimitRequest {
    pub fn new(
        action: impl Into<String>,
        identity: impl Into<String>,
        limit: u64,
        window_seconds: u64,
    ) -> Self {
        Self {
            action: action.into(),
            identity: identity.into(),
            limit,
            window_seconds,
        }
    }

    /// Check the caller contract. Violations are programmer errors, not runtime conditions.
    pub fn validate(&self) -> Result<()> {
        if self.action.is_empty() {
            return Err(PubgateError::InvalidParameters("action must not be empty".into()));
        }
        if self.identity.is_empty() {
            return Err(PubgateError::InvalidParameters(
                "identity must not be empty".into(),
            ));
        }
        if self.limit == 0 {
            return Err(PubgateError::InvalidParameters("limit must be positive".into()));
        }
        if self.window_seconds == 0 {
            return Err(PubgateError::InvalidParameters(
                "window_seconds must be positive".into(),
            ));
        }
        if self.window_seconds.checked_mul(1000).is_none() {
            return Err(PubgateError::InvalidParameters(format!(
                "window_seconds {} is too large",
                self.window_seconds
            )));
        }
        Ok(())
    }

    /// The fixed window this request falls into at `now_ms`.
    pub(crate) fn window_at(&self, now_ms: u64) -> Result<FixedWindow> {
        FixedWindow::containing(now_ms, self.window_seconds).ok_or_else(|| {
            PubgateError::InvalidParameters(format!(
                "window_seconds {} is not a valid window",
                self.window_seconds
            ))
        })
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request is admitted and counted.
    Allowed,
    /// The quota for the current window is spent.
    Limited {
        /// Seconds until the next window boundary, rounded up
        retry_after_seconds: u64,
    },
}

impl RateLimitDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateLimitDecision::Limited { .. })
    }

    /// How long the caller should wait, if rejected.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitDecision::Allowed => None,
            RateLimitDecision::Limited {
                retry_after_seconds,
            } => Some(Duration::from_secs(*retry_after_seconds)),
        }
    }
}
