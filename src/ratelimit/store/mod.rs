//! Counter storage used by the limiter.
//!
//! The limiter never keeps counts in process memory of its own. Everything goes
//! through a [`RateLimitStore`], so production can point at a durable shared
//! table while tests use an in-memory stand-in.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use super::key::RateLimitKey;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Storage contract for rate limit records.
///
/// Every method is atomic with respect to a single key. Nothing here spans
/// multiple keys.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Current count for `key`, or `None` if no record exists.
    async fn read(&self, key: &RateLimitKey) -> Result<Option<u64>, StoreError>;

    /// Insert the record if absent, otherwise overwrite its count.
    async fn upsert(&self, key: &RateLimitKey, count: u64) -> Result<(), StoreError>;

    /// Write `new` only if the stored count equals `expected` (`None` = absent).
    ///
    /// Returns `false` when another writer changed the record first.
    async fn compare_and_set(
        &self,
        key: &RateLimitKey,
        expected: Option<u64>,
        new: u64,
    ) -> Result<bool, StoreError>;

    /// Delete all records whose window started before `window_start_ms`.
    ///
    /// Returns the number of records removed.
    async fn purge_before(&self, window_start_ms: u64) -> Result<u64, StoreError>;
}
