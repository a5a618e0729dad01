//! Database layer for occurrence-dl
//!
//! SQLite persistence shared by the download registry and the cluster-wide
//! admission lock. Every process generating downloads points at the same
//! database file.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`downloads`] - Download records
//! - [`usages`] - Per-dataset record counts of a download
//! - [`locks`] - Admission lock slots

use crate::error::DatabaseError;
use crate::types::DownloadKey;
use crate::{Error, Result};
use sqlx::{FromRow, SqliteConnection, sqlite::SqlitePool};

mod downloads;
mod locks;
mod migrations;
mod usages;

/// New download to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewDownload {
    /// Key of the download
    pub key: DownloadKey,
    /// Predicate in its JSON request form
    pub predicate: String,
    /// Output format name
    pub format: String,
    /// User who requested the download
    pub creator: Option<String>,
}

/// Download record from database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRow {
    /// Key of the download
    pub key: String,
    /// Predicate in its JSON request form
    pub predicate: String,
    /// Output format name
    pub format: String,
    /// Current status (0=preparing, 1=running, 2=succeeded, 3=failed, 4=cancelled)
    pub status: i32,
    /// License selected for the archive
    pub license: Option<String>,
    /// Records matching the predicate
    pub total_records: i64,
    /// Path of the finished archive
    pub archive_path: Option<String>,
    /// Size of the finished archive in bytes
    pub archive_size: Option<i64>,
    /// SHA-256 of the finished archive (hex)
    pub checksum: Option<String>,
    /// Error message if the download failed
    pub error_message: Option<String>,
    /// User who requested the download
    pub creator: Option<String>,
    /// Unix timestamp when the download was created
    pub created_at: i64,
    /// Unix timestamp of the last modification
    pub modified_at: i64,
}

/// Dataset usage record from database
#[derive(Debug, Clone, FromRow)]
pub struct UsageRow {
    /// Dataset key (hyphenated UUID)
    pub dataset_key: String,
    /// Records of the dataset contained in the download
    pub number_records: i64,
}

/// Database handle for occurrence-dl
pub struct Database {
    pool: SqlitePool,
}

/// Commit the open transaction when `result` is Ok, roll it back otherwise
///
/// A COMMIT that fails leaves the transaction open on the pooled connection,
/// so it is rolled back as well.
async fn finish_transaction<T>(
    conn: &mut SqliteConnection,
    result: Result<T>,
    what: &str,
) -> Result<T> {
    let outcome = match result {
        Ok(value) => sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map(|_| value)
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to commit {}: {}",
                    what, e
                )))
            }),
        Err(e) => Err(e),
    };

    if outcome.is_err() {
        let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
    }
    outcome
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
