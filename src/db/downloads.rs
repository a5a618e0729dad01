//! Download record CRUD operations.

use crate::error::DatabaseError;
use crate::types::DownloadKey;
use crate::{Error, Result};

use super::{Database, DownloadRow, NewDownload};

impl Database {
    /// Insert a new download record in the preparing state
    pub async fn insert_download(&self, download: &NewDownload) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO downloads (
                key, predicate, format, status, total_records,
                creator, created_at, modified_at
            ) VALUES (?, ?, ?, 0, 0, ?, ?, ?)
            "#,
        )
        .bind(&download.key)
        .bind(&download.predicate)
        .bind(&download.format)
        .bind(&download.creator)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert download: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a download by key
    pub async fn get_download(&self, key: &DownloadKey) -> Result<Option<DownloadRow>> {
        let row = sqlx::query_as::<_, DownloadRow>(
            r#"
            SELECT
                key, predicate, format, status, license, total_records,
                archive_path, archive_size, checksum, error_message, creator,
                created_at, modified_at
            FROM downloads
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get download: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List downloads with a specific status, oldest first
    pub async fn list_downloads_by_status(&self, status: i32) -> Result<Vec<DownloadRow>> {
        let rows = sqlx::query_as::<_, DownloadRow>(
            r#"
            SELECT
                key, predicate, format, status, license, total_records,
                archive_path, archive_size, checksum, error_message, creator,
                created_at, modified_at
            FROM downloads
            WHERE status = ?
            ORDER BY created_at ASC, key ASC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list downloads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Overwrite the mutable columns of a download
    ///
    /// Returns `false` when no download with the row's key exists.
    pub async fn update_download(&self, row: &DownloadRow) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE downloads SET
                status = ?, license = ?, total_records = ?, archive_path = ?,
                archive_size = ?, checksum = ?, error_message = ?, modified_at = ?
            WHERE key = ?
            "#,
        )
        .bind(row.status)
        .bind(&row.license)
        .bind(row.total_records)
        .bind(&row.archive_path)
        .bind(row.archive_size)
        .bind(&row.checksum)
        .bind(&row.error_message)
        .bind(now)
        .bind(&row.key)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update download: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Update download status
    pub async fn update_status(&self, key: &DownloadKey, status: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query("UPDATE downloads SET status = ?, modified_at = ? WHERE key = ?")
            .bind(status)
            .bind(now)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update status: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record the matched record count of a download
    pub async fn set_total_records(&self, key: &DownloadKey, total_records: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query("UPDATE downloads SET total_records = ?, modified_at = ? WHERE key = ?")
            .bind(total_records)
            .bind(now)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set total records: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Mark a download failed with an error message
    pub async fn set_error(&self, key: &DownloadKey, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "UPDATE downloads SET status = 3, error_message = ?, modified_at = ? WHERE key = ?",
        )
        .bind(error)
        .bind(now)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set error: {}",
                e
            )))
        })?;

        Ok(())
    }
}
