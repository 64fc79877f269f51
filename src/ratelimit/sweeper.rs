//! Periodic removal of records from finished windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::store::{RateLimitStore, StoreError};

/// Delete every record whose window started more than `retention` ago.
///
/// `retention` must be at least the longest window in use, or live windows
/// lose their counts.
pub async fn sweep_once(
    store: &dyn RateLimitStore,
    clock: &dyn Clock,
    retention: Duration,
) -> Result<u64, StoreError> {
    let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
    let cutoff = clock.now_millis().saturating_sub(retention_ms);
    let removed = store.purge_before(cutoff).await?;
    debug!(store = store.name(), cutoff_ms = cutoff, removed = removed, "Swept rate limit records");
    Ok(removed)
}

/// Run [`sweep_once`] every `interval` until `shutdown` flips to `true`.
pub fn spawn_sweeper(
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            retention_secs = retention.as_secs(),
            "Starting rate limit sweeper"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep_once(store.as_ref(), clock.as_ref(), retention).await {
                        warn!(error = %e, "Rate limit sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Rate limit sweeper stopped");
    })
}
