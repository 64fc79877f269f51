//! Durable counter store on SQLite.
//!
//! One row per `(action, identity, window_start)`, enforced by the primary key.
//! All statements run on the blocking pool; the connection is shared behind a
//! mutex, and SQLite's own locking keeps single statements atomic across
//! processes that open the same file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{RateLimitStore, StoreError};
use crate::ratelimit::key::RateLimitKey;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rate_limits (
    action       TEXT    NOT NULL,
    identity     TEXT    NOT NULL,
    window_start INTEGER NOT NULL,
    count        INTEGER NOT NULL,
    PRIMARY KEY (action, identity, window_start)
);
CREATE INDEX IF NOT EXISTS rate_limits_window_start ON rate_limits (window_start);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A [`RateLimitStore`] backed by a SQLite table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening SQLite rate limit store");

        let conn = Connection::open(path).map_err(unavailable)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(unavailable)?;
        Self::from_connection(conn)
    }

    /// A private database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection, creating the table if needed.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        debug!("Rate limit schema ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
        .map_err(unavailable)
    }
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn to_sql(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} {} does not fit in INTEGER", what, value)))
}

/// Owned SQL parameters for one key.
fn key_params(key: &RateLimitKey) -> Result<(String, String, i64), StoreError> {
    Ok((
        key.action.clone(),
        key.identity.clone(),
        to_sql(key.window_start_ms, "window_start")?,
    ))
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn read(&self, key: &RateLimitKey) -> Result<Option<u64>, StoreError> {
        let (action, identity, window_start) = key_params(key)?;
        let count: Option<i64> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT count FROM rate_limits
                     WHERE action = ?1 AND identity = ?2 AND window_start = ?3",
                    params![action, identity, window_start],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        count
            .map(|c| {
                u64::try_from(c)
                    .map_err(|_| StoreError::Corrupt(format!("negative count {} for {}", c, key)))
            })
            .transpose()
    }

    async fn upsert(&self, key: &RateLimitKey, count: u64) -> Result<(), StoreError> {
        let (action, identity, window_start) = key_params(key)?;
        let count = to_sql(count, "count")?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO rate_limits (action, identity, window_start, count)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (action, identity, window_start)
                 DO UPDATE SET count = excluded.count",
                params![action, identity, window_start, count],
            )
        })
        .await?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &RateLimitKey,
        expected: Option<u64>,
        new: u64,
    ) -> Result<bool, StoreError> {
        let (action, identity, window_start) = key_params(key)?;
        let new = to_sql(new, "count")?;
        let expected = expected.map(|e| to_sql(e, "count")).transpose()?;

        let changed = self
            .with_conn(move |conn| match expected {
                None => conn.execute(
                    "INSERT INTO rate_limits (action, identity, window_start, count)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (action, identity, window_start) DO NOTHING",
                    params![action, identity, window_start, new],
                ),
                Some(expected) => conn.execute(
                    "UPDATE rate_limits SET count = ?4
                     WHERE action = ?1 AND identity = ?2 AND window_start = ?3 AND count = ?5",
                    params![action, identity, window_start, new, expected],
                ),
            })
            .await?;

        Ok(changed == 1)
    }

    async fn purge_before(&self, window_start_ms: u64) -> Result<u64, StoreError> {
        let cutoff = to_sql(window_start_ms, "window_start")?;
        let removed = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM rate_limits WHERE window_start < ?1",
                    params![cutoff],
                )
            })
            .await?;
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(window_start_ms: u64) -> RateLimitKey {
        RateLimitKey::new("upvote_toggle", "u1", window_start_ms)
    }

    fn temp_db_path(tag: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "pubgate-{}-{}-{}.db",
            tag,
            std::process::id(),
            nanos
        ))
    }

    #[tokio::test]
    async fn test_read_absent() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.read(&key(0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_replaces_count() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.upsert(&key(0), 1).await.unwrap();
        store.upsert(&key(0), 7).await.unwrap();

        assert_eq!(store.read(&key(0)).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(store.compare_and_set(&key(0), None, 1).await.unwrap());
        assert!(!store.compare_and_set(&key(0), None, 1).await.unwrap());
        assert!(!store.compare_and_set(&key(0), Some(3), 4).await.unwrap());
        assert!(store.compare_and_set(&key(0), Some(1), 2).await.unwrap());
        assert_eq!(store.read(&key(0)).await.unwrap(), Some(2));

        assert!(!store.compare_and_set(&key(60_000), Some(0), 1).await.unwrap());
        assert_eq!(store.read(&key(60_000)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let other_identity = RateLimitKey::new("upvote_toggle", "u2", 0);
        let other_action = RateLimitKey::new("comment_add", "u1", 0);

        store.upsert(&key(0), 10).await.unwrap();

        assert_eq!(store.read(&other_identity).await.unwrap(), None);
        assert_eq!(store.read(&other_action).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_before() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert(&key(0), 3).await.unwrap();
        store.upsert(&key(60_000), 2).await.unwrap();
        store.upsert(&key(120_000), 1).await.unwrap();

        assert_eq!(store.purge_before(120_000).await.unwrap(), 2);
        assert_eq!(store.read(&key(0)).await.unwrap(), None);
        assert_eq!(store.read(&key(120_000)).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_counts_survive_reopen() {
        let path = temp_db_path("reopen");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert(&key(0), 4).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.read(&key(0)).await.unwrap(), Some(4));

        drop(store);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[tokio::test]
    async fn test_oversized_values_are_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.upsert(&key(u64::MAX), 1).await;
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
