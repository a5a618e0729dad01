//! Dataset usage persistence.

use crate::error::DatabaseError;
use crate::types::{DatasetKey, DownloadKey};
use crate::{Error, Result};
use std::collections::BTreeMap;

use super::{Database, UsageRow, finish_transaction};

impl Database {
    /// Store the per-dataset record counts of a download
    ///
    /// Written in one transaction. Re-running replaces earlier counts for the
    /// same datasets.
    pub async fn insert_dataset_usages(
        &self,
        key: &DownloadKey,
        usages: &BTreeMap<DatasetKey, u64>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            for (dataset_key, records) in usages {
                sqlx::query(
                    r#"
                    INSERT INTO dataset_usages (download_key, dataset_key, number_records)
                    VALUES (?, ?, ?)
                    ON CONFLICT (download_key, dataset_key)
                    DO UPDATE SET number_records = excluded.number_records
                    "#,
                )
                .bind(key)
                .bind(dataset_key.hyphenated().to_string())
                .bind(i64::try_from(*records).unwrap_or(i64::MAX))
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert dataset usage: {}",
                        e
                    )))
                })?;
            }
            Ok::<(), Error>(())
        }
        .await;

        finish_transaction(&mut conn, result, "dataset usages").await
    }

    /// Per-dataset record counts of a download, ordered by dataset key
    pub async fn list_dataset_usages(&self, key: &DownloadKey) -> Result<Vec<UsageRow>> {
        let rows = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT dataset_key, number_records
            FROM dataset_usages
            WHERE download_key = ?
            ORDER BY dataset_key ASC
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list dataset usages: {}",
                e
            )))
        })?;

        Ok(rows)
    }
}
