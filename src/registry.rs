//! Download registry
//!
//! The registry records every download, its lifecycle status and, once the
//! archive exists, the selected license and the per-dataset record counts.

use crate::db::{Database, DownloadRow, NewDownload};
use crate::error::{Error, Result};
use crate::license::License;
use crate::types::{DatasetKey, DownloadFormat, DownloadKey, DownloadStatus};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A registered download
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadRecord {
    /// Download key
    pub key: DownloadKey,
    /// Predicate in its JSON request form
    pub predicate: String,
    /// Requested output format
    pub format: DownloadFormat,
    /// Lifecycle status
    pub status: DownloadStatus,
    /// License selected for the archive, once known
    pub license: Option<License>,
    /// Records matching the predicate
    pub total_records: u64,
    /// Final artifact
    pub archive_path: Option<PathBuf>,
    /// Artifact size in bytes
    pub archive_size: Option<u64>,
    /// Hex SHA-256 of the artifact
    pub checksum: Option<String>,
    /// Why the download failed
    pub error_message: Option<String>,
    /// Requesting user
    pub creator: Option<String>,
    /// Registration time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
}

impl DownloadRecord {
    fn from_row(row: DownloadRow) -> Result<Self> {
        Ok(Self {
            key: DownloadKey(row.key),
            predicate: row.predicate,
            format: DownloadFormat::from_name(&row.format)?,
            status: DownloadStatus::from_i32(row.status),
            license: row.license.as_deref().and_then(License::parse),
            total_records: u64::try_from(row.total_records).unwrap_or(0),
            archive_path: row.archive_path.map(PathBuf::from),
            archive_size: row.archive_size.and_then(|s| u64::try_from(s).ok()),
            checksum: row.checksum,
            error_message: row.error_message,
            creator: row.creator,
            created_at: timestamp(row.created_at),
            modified_at: timestamp(row.modified_at),
        })
    }

    fn to_row(&self) -> DownloadRow {
        DownloadRow {
            key: self.key.0.clone(),
            predicate: self.predicate.clone(),
            format: self.format.as_str().to_string(),
            status: self.status.to_i32(),
            license: self.license.map(|l| l.as_str().to_string()),
            total_records: i64::try_from(self.total_records).unwrap_or(i64::MAX),
            archive_path: self
                .archive_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            archive_size: self.archive_size.map(|s| i64::try_from(s).unwrap_or(i64::MAX)),
            checksum: self.checksum.clone(),
            error_message: self.error_message.clone(),
            creator: self.creator.clone(),
            created_at: self.created_at.timestamp(),
            modified_at: self.modified_at.timestamp(),
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Persistence of download records and their bookkeeping
#[async_trait]
pub trait Registry: Send + Sync {
    /// Register a new download in the `Preparing` state
    async fn create(&self, download: &NewDownload) -> Result<()>;

    /// Fetch a download; [`Error::NotFound`] when the key is unknown
    async fn get(&self, key: &DownloadKey) -> Result<DownloadRecord>;

    /// Store the mutable fields of a download
    async fn update(&self, record: &DownloadRecord) -> Result<()>;

    /// Store the per-dataset record counts of a download
    async fn create_usages(
        &self,
        key: &DownloadKey,
        usages: &BTreeMap<DatasetKey, u64>,
    ) -> Result<()>;
}

/// Registry backed by the shared SQLite database
#[derive(Clone)]
pub struct SqliteRegistry {
    db: Arc<Database>,
}

impl SqliteRegistry {
    /// Create a registry over an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Per-dataset record counts stored for a download
    pub async fn usages(&self, key: &DownloadKey) -> Result<BTreeMap<DatasetKey, u64>> {
        let rows = self.db.list_dataset_usages(key).await?;
        let mut usages = BTreeMap::new();
        for row in rows {
            let dataset_key = DatasetKey::parse_str(&row.dataset_key).map_err(|e| {
                Error::Other(format!(
                    "invalid dataset key '{}' stored for download {}: {}",
                    row.dataset_key, key, e
                ))
            })?;
            usages.insert(dataset_key, u64::try_from(row.number_records).unwrap_or(0));
        }
        Ok(usages)
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn create(&self, download: &NewDownload) -> Result<()> {
        self.db.insert_download(download).await
    }

    async fn get(&self, key: &DownloadKey) -> Result<DownloadRecord> {
        match self.db.get_download(key).await? {
            Some(row) => DownloadRecord::from_row(row),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn update(&self, record: &DownloadRecord) -> Result<()> {
        if self.db.update_download(&record.to_row()).await? {
            Ok(())
        } else {
            Err(Error::NotFound(record.key.to_string()))
        }
    }

    async fn create_usages(
        &self,
        key: &DownloadKey,
        usages: &BTreeMap<DatasetKey, u64>,
    ) -> Result<()> {
        self.db.insert_dataset_usages(key, usages).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn registry() -> (SqliteRegistry, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();
        (SqliteRegistry::new(Arc::new(db)), temp_file)
    }

    fn new_download(key: &str) -> NewDownload {
        NewDownload {
            key: DownloadKey::new(key),
            predicate: r#"{"type":"equals","key":"YEAR","value":"2000"}"#.to_string(),
            format: DownloadFormat::Dwca.as_str().to_string(),
            creator: Some("alice".to_string()),
        }
    }

    #[tokio::test]
    async fn created_download_reads_back_typed() {
        let (registry, _temp) = registry().await;
        registry.create(&new_download("0001")).await.unwrap();

        let record = registry.get(&DownloadKey::new("0001")).await.unwrap();

        assert_eq!(record.status, DownloadStatus::Preparing);
        assert_eq!(record.format, DownloadFormat::Dwca);
        assert_eq!(record.license, None);
        assert_eq!(record.total_records, 0);
        assert_eq!(record.creator.as_deref(), Some("alice"));
        assert!(record.created_at.timestamp() > 0);
    }

    #[tokio::test]
    async fn unknown_stored_format_is_an_error() {
        let (registry, _temp) = registry().await;
        let mut download = new_download("0005");
        download.format = "AVRO".to_string();
        registry.create(&download).await.unwrap();

        let err = registry.get(&DownloadKey::new("0005")).await.unwrap_err();

        assert!(matches!(err, Error::Other(message) if message.contains("AVRO")));
    }

    #[tokio::test]
    async fn missing_download_is_not_found() {
        let (registry, _temp) = registry().await;

        let err = registry.get(&DownloadKey::new("nope")).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(key) if key == "nope"));
    }

    #[tokio::test]
    async fn update_persists_license_and_archive() {
        let (registry, _temp) = registry().await;
        registry.create(&new_download("0002")).await.unwrap();

        let mut record = registry.get(&DownloadKey::new("0002")).await.unwrap();
        record.status = DownloadStatus::Succeeded;
        record.license = Some(License::CcByNc4_0);
        record.total_records = 1_500;
        record.archive_path = Some(PathBuf::from("/downloads/0002.zip"));
        record.archive_size = Some(4_096);
        record.checksum = Some("abc".to_string());
        registry.update(&record).await.unwrap();

        let stored = registry.get(&DownloadKey::new("0002")).await.unwrap();
        assert_eq!(stored.status, DownloadStatus::Succeeded);
        assert_eq!(stored.license, Some(License::CcByNc4_0));
        assert_eq!(stored.total_records, 1_500);
        assert_eq!(stored.archive_path, record.archive_path);
        assert_eq!(stored.archive_size, Some(4_096));
        assert_eq!(stored.checksum.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn updating_unknown_download_is_not_found() {
        let (registry, _temp) = registry().await;
        registry.create(&new_download("0003")).await.unwrap();
        let mut record = registry.get(&DownloadKey::new("0003")).await.unwrap();
        record.key = DownloadKey::new("other");

        let err = registry.update(&record).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn usages_round_trip() {
        let (registry, _temp) = registry().await;
        registry.create(&new_download("0004")).await.unwrap();
        let key = DownloadKey::new("0004");
        let usages = BTreeMap::from([
            (DatasetKey::from_u128(1), 10),
            (DatasetKey::from_u128(2), 3),
        ]);

        registry.create_usages(&key, &usages).await.unwrap();

        assert_eq!(registry.usages(&key).await.unwrap(), usages);
    }
}
