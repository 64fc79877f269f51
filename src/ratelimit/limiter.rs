//! Core rate limiter implementation.
//!
//! Fixed, epoch-aligned windows: the quota of `(action, identity)` resets at
//! every multiple of the window length. Up to `2 * limit` requests can land
//! around a boundary; that imprecision is accepted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::RateLimitKey;
use super::policy::RateLimitPolicies;
use super::request::{RateLimitDecision, RateLimitRequest};
use super::store::{RateLimitStore, StoreError};
use crate::error::{PubgateError, Result};

/// Extra compare-and-set attempts allowed beyond `limit` before giving up on a key.
const CAS_SLACK: u64 = 8;

/// How an admitted request is written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// Conditional write, re-read on a lost race. Never admits more than `limit`.
    #[default]
    CompareAndSet,
    /// Plain read then upsert. One round-trip less, but concurrent callers
    /// can both be admitted on the last slot.
    ReadUpsert,
}

/// What to decide when the store cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request.
    #[default]
    Open,
    /// Reject the request until the end of the current window.
    Closed,
}

/// Tunables for [`RateLimiter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterOptions {
    pub consistency: Consistency,
    pub failure_policy: FailurePolicy,
}

/// Admission control for named, per-identity quotas.
///
/// Holds no counts of its own; all state lives in the injected store. Cheap to
/// share behind an `Arc`.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    policies: RateLimitPolicies,
    options: LimiterOptions,
    max_window_secs: Option<u64>,
}

impl RateLimiter {
    /// Create a limiter over `store` with the wall clock, built-in policies and default options.
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policies: RateLimitPolicies::builtin(),
            options: LimiterOptions::default(),
            max_window_secs: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policies(mut self, policies: RateLimitPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_options(mut self, options: LimiterOptions) -> Self {
        self.options = options;
        self
    }

    /// Reject requests whose window is longer than `secs`.
    ///
    /// Counts of longer windows would outlive the sweeper's retention and be
    /// purged while the window is still open.
    pub fn with_max_window(mut self, secs: u64) -> Self {
        self.max_window_secs = Some(secs);
        self
    }

    pub fn policies(&self) -> &RateLimitPolicies {
        &self.policies
    }

    pub fn options(&self) -> LimiterOptions {
        self.options
    }

    /// Decide admit/reject for one request and count it if admitted.
    ///
    /// Errors only on contract violations. Store failures are absorbed
    /// according to the configured [`FailurePolicy`].
    pub async fn check_rate_limit(&self, request: &RateLimitRequest) -> Result<RateLimitDecision> {
        self.check_window(request)?;
        decide(
            self.store.as_ref(),
            self.clock.now_millis(),
            self.options,
            request,
        )
        .await
    }

    /// Check `action` for `identity` using the configured policy.
    pub async fn check_action(&self, action: &str, identity: &str) -> Result<RateLimitDecision> {
        let request = self.resolve(action, identity, None, None)?;
        self.check_rate_limit(&request).await
    }

    /// Build a request, taking whatever limit or window is missing from the policy table.
    pub fn resolve(
        &self,
        action: &str,
        identity: &str,
        limit: Option<u64>,
        window_seconds: Option<u64>,
    ) -> Result<RateLimitRequest> {
        let (limit, window_seconds) = match (limit, window_seconds) {
            (Some(limit), Some(window_seconds)) => (limit, window_seconds),
            (limit, window_seconds) => {
                let policy = self
                    .policies
                    .get(action)
                    .ok_or_else(|| PubgateError::UnknownAction(action.to_string()))?;
                (
                    limit.unwrap_or(policy.limit),
                    window_seconds.unwrap_or_else(|| policy.window_secs()),
                )
            }
        };

        let request = RateLimitRequest::new(action, identity, limit, window_seconds);
        request.validate()?;
        self.check_window(&request)?;
        Ok(request)
    }

    fn check_window(&self, request: &RateLimitRequest) -> Result<()> {
        match self.max_window_secs {
            Some(max) if request.window_seconds > max => Err(PubgateError::InvalidParameters(
                format!(
                    "window_seconds {} exceeds the maximum of {}",
                    request.window_seconds, max
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Stored count for the request's current window, without counting a hit.
    pub async fn current_count(&self, request: &RateLimitRequest) -> Result<u64> {
        request.validate()?;
        let window = request.window_at(self.clock.now_millis())?;
        let key = RateLimitKey::new(&request.action, &request.identity, window.start_ms());
        Ok(self.store.read(&key).await?.unwrap_or(0))
    }
}

/// Check one request against `store` with the wall clock and default options.
pub async fn check_rate_limit(
    store: &dyn RateLimitStore,
    request: &RateLimitRequest,
) -> Result<RateLimitDecision> {
    decide(
        store,
        SystemClock.now_millis(),
        LimiterOptions::default(),
        request,
    )
    .await
}

async fn decide(
    store: &dyn RateLimitStore,
    now_ms: u64,
    options: LimiterOptions,
    request: &RateLimitRequest,
) -> Result<RateLimitDecision> {
    request.validate()?;

    let window = request.window_at(now_ms)?;
    let key = RateLimitKey::new(&request.action, &request.identity, window.start_ms());
    let retry_after_seconds = window.retry_after_seconds(now_ms);

    trace!(
        key = %key,
        limit = request.limit,
        store = store.name(),
        "Checking rate limit"
    );

    // Every lost race means another caller was admitted on this key, so a
    // well-behaved store settles within `limit` attempts.
    let max_attempts = request.limit.saturating_add(CAS_SLACK);

    for attempt in 1..=max_attempts {
        let current = match store.read(&key).await {
            Ok(current) => current,
            Err(e) => {
                return Ok(on_store_failure(
                    options.failure_policy,
                    &key,
                    retry_after_seconds,
                    &e,
                ))
            }
        };

        let count = current.unwrap_or(0);
        if count >= request.limit {
            debug!(
                key = %key,
                count = count,
                limit = request.limit,
                retry_after_seconds = retry_after_seconds,
                "Rate limit exceeded"
            );
            return Ok(RateLimitDecision::Limited {
                retry_after_seconds,
            });
        }

        let next = count + 1;
        match options.consistency {
            Consistency::ReadUpsert => {
                if let Err(e) = store.upsert(&key, next).await {
                    warn!(key = %key, error = %e, "Failed to record admitted request");
                }
                return Ok(RateLimitDecision::Allowed);
            }
            Consistency::CompareAndSet => {
                match store.compare_and_set(&key, current, next).await {
                    Ok(true) => return Ok(RateLimitDecision::Allowed),
                    Ok(false) => {
                        trace!(key = %key, attempt = attempt, "Counter changed underneath, retrying");
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to record admitted request");
                        return Ok(RateLimitDecision::Allowed);
                    }
                }
            }
        }
    }

    let contention = StoreError::Unavailable(format!(
        "counter did not settle after {} attempts",
        max_attempts
    ));
    Ok(on_store_failure(
        options.failure_policy,
        &key,
        retry_after_seconds,
        &contention,
    ))
}

fn on_store_failure(
    policy: FailurePolicy,
    key: &RateLimitKey,
    retry_after_seconds: u64,
    error: &StoreError,
) -> RateLimitDecision {
    match policy {
        FailurePolicy::Open => {
            warn!(key = %key, error = %error, "Rate limit store failed, admitting request");
            RateLimitDecision::Allowed
        }
        FailurePolicy::Closed => {
            warn!(key = %key, error = %error, "Rate limit store failed, rejecting request");
            RateLimitDecision::Limited {
                retry_after_seconds,
            }
        }
    }
}
