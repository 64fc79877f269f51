//! In-process counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{RateLimitStore, StoreError};
use crate::ratelimit::key::RateLimitKey;

/// A [`RateLimitStore`] kept in a sharded concurrent map.
///
/// Each operation holds the shard lock of its key for its whole duration, which
/// makes `compare_and_set` atomic. Counts are lost on restart and not shared
/// between processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<RateLimitKey, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, dead windows included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, key: &RateLimitKey) -> Result<Option<u64>, StoreError> {
        Ok(self.records.get(key).map(|count| *count))
    }

    async fn upsert(&self, key: &RateLimitKey, count: u64) -> Result<(), StoreError> {
        self.records.insert(key.clone(), count);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &RateLimitKey,
        expected: Option<u64>,
        new: u64,
    ) -> Result<bool, StoreError> {
        match (self.records.entry(key.clone()), expected) {
            (Entry::Vacant(slot), None) => {
                slot.insert(new);
                Ok(true)
            }
            (Entry::Occupied(mut slot), Some(expected)) if *slot.get() == expected => {
                slot.insert(new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_before(&self, window_start_ms: u64) -> Result<u64, StoreError> {
        let before = self.records.len();
        self.records
            .retain(|key, _| key.window_start_ms >= window_start_ms);
        Ok(before.saturating_sub(self.records.len()) as u64)
    }
}
