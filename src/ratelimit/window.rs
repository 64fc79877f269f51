//! Epoch-aligned fixed window arithmetic.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shorthand window lengths accepted in policy files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// Length of this unit in seconds.
    pub fn as_secs(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3600,
            TimeUnit::Day => 86400,
        }
    }
}

/// One fixed window: `[start_ms, start_ms + length_ms)`.
///
/// Windows are anchored to the Unix epoch, so every caller that observes the
/// same instant computes the same `start_ms` without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedWindow {
    start_ms: u64,
    length_ms: u64,
}

impl FixedWindow {
    /// The window of `window_seconds` that contains `now_ms`.
    ///
    /// Returns `None` when the window length is zero or overflows milliseconds.
    pub fn containing(now_ms: u64, window_seconds: u64) -> Option<Self> {
        let length_ms = window_seconds.checked_mul(1000)?;
        if length_ms == 0 {
            return None;
        }
        let start_ms = (now_ms / length_ms) * length_ms;
        Some(Self {
            start_ms,
            length_ms,
        })
    }

    /// Start of the window, in milliseconds since the epoch.
    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    /// Window length in milliseconds.
    pub fn length_ms(&self) -> u64 {
        self.length_ms
    }

    /// First millisecond of the next window.
    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.length_ms)
    }

    /// Whole seconds from `now_ms` until the next window boundary, rounded up.
    pub fn retry_after_seconds(&self, now_ms: u64) -> u64 {
        let remaining_ms = self.end_ms().saturating_sub(now_ms);
        remaining_ms.div_ceil(1000)
    }
}
