//! Composite key of a rate limit record.

use chrono::{DateTime, SecondsFormat, Utc};

/// A key that uniquely identifies one counter row.
///
/// At most one record exists per `(action, identity, window_start_ms)`.
/// Distinct actions never share quota, even for the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The throttled operation, e.g. `comment_add`
    pub action: String,
    /// The caller the quota is counted against
    pub identity: String,
    /// Window start, milliseconds since the epoch, floored to the window boundary
    pub window_start_ms: u64,
}

impl RateLimitKey {
    /// Create a new rate limit key.
    pub fn new(action: &str, identity: &str, window_start_ms: u64) -> Self {
        Self {
            action: action.to_string(),
            identity: identity.to_string(),
            window_start_ms,
        }
    }

    /// Window start as a UTC timestamp, if representable.
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.window_start_ms)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.window_start() {
            Some(start) => write!(
                f,
                "{}:{}@{}",
                self.action,
                self.identity,
                start.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            None => write!(f, "{}:{}@{}ms", self.action, self.identity, self.window_start_ms),
        }
    }
}
