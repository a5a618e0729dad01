//! Counting locks shared through the SQLite database

use super::{LockGuard, LockService};
use crate::config::LockConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Named counting locks stored as slot rows in the shared database
///
/// Every process pointing at the same database file shares the locks. A
/// waiting acquirer polls with a jittered interval. A holder renews its lease
/// every third of the lease TTL for as long as it keeps the guard; slots not
/// renewed within the TTL belong to a crashed process and are reclaimed.
#[derive(Clone)]
pub struct SqliteLockService {
    inner: Arc<Inner>,
}

struct Inner {
    db: Arc<Database>,
    permits: u32,
    poll_interval: Duration,
    lease_ttl: Duration,
    /// Identifies this service instance in the `holder` column
    instance: String,
    next_holder: AtomicU64,
}

impl SqliteLockService {
    /// Create a lock service on a shared database
    pub fn new(db: Arc<Database>, config: &LockConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                permits: config.permits.max(1),
                poll_interval: config.poll_interval,
                lease_ttl: config.lease_ttl,
                instance: uuid::Uuid::new_v4().simple().to_string(),
                next_holder: AtomicU64::new(0),
            }),
        }
    }

    /// Permits of every lock this service hands out
    pub fn permits(&self) -> u32 {
        self.inner.permits
    }

    fn poll_delay(&self) -> Duration {
        let base = self.inner.poll_interval;
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=0.5);
        base.mul_f64(1.0 + jitter)
    }
}

impl Inner {
    /// One attempt; the returned guard owns the slot
    async fn try_acquire(self: Arc<Self>, name: String) -> Result<Option<LockGuard>> {
        let holder = format!(
            "{}-{}",
            self.instance,
            self.next_holder.fetch_add(1, Ordering::Relaxed)
        );
        let ttl = i64::try_from(self.lease_ttl.as_secs()).unwrap_or(i64::MAX);
        let stale_before = chrono::Utc::now().timestamp().saturating_sub(ttl);

        let Some(slot) = self
            .db
            .try_acquire_lock_slot(&name, self.permits, &holder, stale_before)
            .await?
        else {
            return Ok(None);
        };
        tracing::debug!(lock = %name, slot, holder = %holder, "admission slot acquired");

        let heartbeat = tokio::spawn(renew_slot(
            self.db.clone(),
            name.clone(),
            slot,
            holder.clone(),
            self.renew_interval(),
        ))
        .abort_handle();

        let db = self.db.clone();
        let lock_name = name.clone();
        Ok(Some(LockGuard::new(name, move || {
            heartbeat.abort();
            release_slot(db, lock_name, slot, holder)
        })))
    }

    fn renew_interval(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(100))
    }
}

/// Keep the lease of a held slot fresh until aborted by the guard
async fn renew_slot(db: Arc<Database>, name: String, slot: i64, holder: String, every: Duration) {
    let mut ticks = tokio::time::interval(every);
    // the first tick completes immediately
    ticks.tick().await;
    loop {
        ticks.tick().await;
        match db.renew_lock_slot(&name, slot, &holder).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(lock = %name, slot, holder = %holder, "admission slot lease lost");
                return;
            }
            Err(e) => {
                tracing::warn!(lock = %name, slot, error = %e, "failed to renew admission slot");
            }
        }
    }
}

/// Delete the slot row in the background; drop can't await
fn release_slot(db: Arc<Database>, name: String, slot: i64, holder: String) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = db.release_lock_slot(&name, slot, &holder).await {
                    tracing::warn!(lock = %name, slot, error = %e, "failed to release admission slot");
                }
            });
        }
        Err(_) => {
            tracing::warn!(
                lock = %name,
                slot,
                "no runtime to release admission slot; it is reclaimed once its lease expires"
            );
        }
    }
}

#[async_trait]
impl LockService for SqliteLockService {
    async fn acquire(&self, name: &str) -> Result<LockGuard> {
        loop {
            // Each attempt runs as its own task: if this future is dropped while
            // an attempt is in flight, the slot it takes is released on completion.
            let attempt = tokio::spawn(self.inner.clone().try_acquire(name.to_string()));
            let outcome = attempt.await.map_err(|e| Error::LockAcquisition {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

            match outcome {
                Ok(Some(guard)) => return Ok(guard),
                Ok(None) => tokio::time::sleep(self.poll_delay()).await,
                Err(e) => {
                    return Err(Error::LockAcquisition {
                        name: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
