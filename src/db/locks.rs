//! Admission lock slots.
//!
//! A counting lock named `name` with `permits` slots is the set of rows
//! `(name, slot)` with `slot < permits`. Holding a row means holding one permit.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, finish_transaction};

impl Database {
    /// Try to take a free slot of a counting lock
    ///
    /// Slots whose lease was last renewed before `stale_before` (unix seconds)
    /// are reclaimed first.
    /// Returns the slot number, or `None` when every slot is held.
    pub async fn try_acquire_lock_slot(
        &self,
        name: &str,
        permits: u32,
        holder: &str,
        stale_before: i64,
    ) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        // IMMEDIATE takes the write lock up front so two processes can't pick the same slot
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to begin lock transaction: {}",
                    e
                )))
            })?;

        let result = async {
            let reclaimed = sqlx::query("DELETE FROM admission_locks WHERE name = ? AND acquired_at < ?")
                .bind(name)
                .bind(stale_before)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to reclaim stale lock slots: {}",
                        e
                    )))
                })?
                .rows_affected();
            if reclaimed > 0 {
                tracing::warn!(lock = name, reclaimed, "reclaimed stale admission lock slots");
            }

            let held: Vec<i64> = sqlx::query_scalar(
                "SELECT slot FROM admission_locks WHERE name = ? ORDER BY slot ASC",
            )
            .bind(name)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list lock slots: {}",
                    e
                )))
            })?;

            let Some(slot) = (0..i64::from(permits)).find(|s| !held.contains(s)) else {
                return Ok(None);
            };

            sqlx::query(
                "INSERT INTO admission_locks (name, slot, holder, acquired_at) VALUES (?, ?, ?, ?)",
            )
            .bind(name)
            .bind(slot)
            .bind(holder)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to take lock slot: {}",
                    e
                )))
            })?;

            Ok::<Option<i64>, Error>(Some(slot))
        }
        .await;

        finish_transaction(&mut conn, result, "lock transaction").await
    }

    /// Refresh the lease of a held slot
    ///
    /// Returns `false` when the slot no longer belongs to `holder`.
    pub async fn renew_lock_slot(&self, name: &str, slot: i64, holder: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE admission_locks SET acquired_at = ? WHERE name = ? AND slot = ? AND holder = ?",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(name)
        .bind(slot)
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to renew lock slot: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Give a slot back
    ///
    /// Only the holder that took the slot can release it; returns `false` when
    /// the slot was already reclaimed.
    pub async fn release_lock_slot(&self, name: &str, slot: i64, holder: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM admission_locks WHERE name = ? AND slot = ? AND holder = ?")
                .bind(name)
                .bind(slot)
                .bind(holder)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to release lock slot: {}",
                        e
                    )))
                })?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of slots currently held for a lock
    pub async fn count_lock_holders(&self, name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admission_locks WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count lock holders: {}",
                    e
                )))
            })?;

        Ok(count)
    }
}
