//! Core types for occurrence-dl

use crate::error::{self, Error};
use crate::license::License;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a dataset contributing records to a download
pub type DatasetKey = uuid::Uuid;

/// Unique key of a download request
///
/// Keys are time-prefixed so that directory listings of the work and output
/// directories sort chronologically, e.g. `20261018093012-4f1c2a9b0d3e`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadKey(pub String);

impl DownloadKey {
    /// Create a key from an existing string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a fresh key for a new download
    pub fn generate() -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", stamp, &suffix[..12]))
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for DownloadKey {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DownloadKey {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DownloadKey {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let key = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(key))
    }
}

/// Output format of a download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadFormat {
    /// Zip archive holding one tab-delimited file of interpreted columns
    #[default]
    SimpleCsv,
    /// Darwin Core Archive: interpreted and verbatim files plus descriptor
    Dwca,
    /// A single uncompressed tab-delimited file
    SimpleTsv,
}

impl DownloadFormat {
    /// Extension of the final artifact
    pub fn extension(&self) -> &'static str {
        match self {
            DownloadFormat::SimpleCsv | DownloadFormat::Dwca => "zip",
            DownloadFormat::SimpleTsv => "tsv",
        }
    }

    /// Whether the verbatim columns are exported alongside the interpreted ones
    pub fn includes_verbatim(&self) -> bool {
        matches!(self, DownloadFormat::Dwca)
    }

    /// Stable name used in the registry
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFormat::SimpleCsv => "SIMPLE_CSV",
            DownloadFormat::Dwca => "DWCA",
            DownloadFormat::SimpleTsv => "SIMPLE_TSV",
        }
    }

    /// Parse a registry name
    pub fn from_name(name: &str) -> error::Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SIMPLE_CSV" => Ok(DownloadFormat::SimpleCsv),
            "DWCA" => Ok(DownloadFormat::Dwca),
            "SIMPLE_TSV" => Ok(DownloadFormat::SimpleTsv),
            _ => Err(Error::Other(format!("unknown download format '{}'", name))),
        }
    }
}

/// Lifecycle status of a download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Registered, query being compiled and counted
    Preparing,
    /// Jobs are executing
    Running,
    /// Archive produced
    Succeeded,
    /// Failed with error
    Failed,
    /// Cancelled by the requester or a shutdown
    Cancelled,
}

impl DownloadStatus {
    /// Convert integer status code to DownloadStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => DownloadStatus::Preparing,
            1 => DownloadStatus::Running,
            2 => DownloadStatus::Succeeded,
            3 => DownloadStatus::Failed,
            4 => DownloadStatus::Cancelled,
            _ => DownloadStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert DownloadStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadStatus::Preparing => 0,
            DownloadStatus::Running => 1,
            DownloadStatus::Succeeded => 2,
            DownloadStatus::Failed => 3,
            DownloadStatus::Cancelled => 4,
        }
    }

    /// Whether no further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Succeeded | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }
}

/// Events emitted by the download engine
///
/// Subscribe through [`DownloadEngine::subscribe`](crate::download::DownloadEngine::subscribe).
/// Requester notification (e-mail, webhooks) hangs off these events.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Download registered
    DownloadQueued {
        /// Download key
        key: DownloadKey,
        /// Requested output format
        format: DownloadFormat,
    },

    /// The compiled query was counted and jobs were planned
    RecordsCounted {
        /// Download key
        key: DownloadKey,
        /// Records matching the predicate
        total_records: u64,
        /// Records that will actually be exported (after the cap)
        exported_records: u64,
        /// Number of jobs planned
        jobs: usize,
    },

    /// A job acquired its admission slot and started
    JobStarted {
        /// Download key
        key: DownloadKey,
        /// Job index
        job_index: usize,
        /// First record offset
        from: u64,
        /// Exclusive end offset
        to: u64,
    },

    /// A job finished writing its partial files
    JobCompleted {
        /// Download key
        key: DownloadKey,
        /// Job index
        job_index: usize,
        /// Records written by the job
        records: u64,
    },

    /// All jobs finished; partial files are being merged
    Aggregating {
        /// Download key
        key: DownloadKey,
    },

    /// Archive produced
    DownloadComplete {
        /// Download key
        key: DownloadKey,
        /// Path of the final archive
        archive: PathBuf,
        /// Records in the archive
        total_records: u64,
        /// License selected for the archive
        license: License,
    },

    /// Download failed
    DownloadFailed {
        /// Download key
        key: DownloadKey,
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },

    /// Download cancelled
    DownloadCancelled {
        /// Download key
        key: DownloadKey,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_unique_and_time_prefixed() {
        let a = DownloadKey::generate();
        let b = DownloadKey::generate();

        assert_ne!(a, b);
        let (stamp, suffix) = a.as_str().split_once('-').unwrap();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 12);
    }

    #[test]
    fn status_round_trips_through_i32_for_all_variants() {
        for status in [
            DownloadStatus::Preparing,
            DownloadStatus::Running,
            DownloadStatus::Succeeded,
            DownloadStatus::Failed,
            DownloadStatus::Cancelled,
        ] {
            assert_eq!(DownloadStatus::from_i32(status.to_i32()), status);
        }
        assert_eq!(DownloadStatus::from_i32(99), DownloadStatus::Failed);
    }

    #[test]
    fn format_names_round_trip_and_reject_unknown() {
        for format in [
            DownloadFormat::SimpleCsv,
            DownloadFormat::Dwca,
            DownloadFormat::SimpleTsv,
        ] {
            assert_eq!(DownloadFormat::from_name(format.as_str()).unwrap(), format);
        }
        assert_eq!(DownloadFormat::from_name("dwca").unwrap(), DownloadFormat::Dwca);
        assert!(matches!(
            DownloadFormat::from_name("avro"),
            Err(Error::Other(message)) if message.contains("avro")
        ));
        assert_eq!(
            serde_json::to_string(&DownloadFormat::SimpleCsv).unwrap(),
            "\"SIMPLE_CSV\""
        );
    }

    #[test]
    fn only_zip_formats_have_zip_extension() {
        assert_eq!(DownloadFormat::SimpleCsv.extension(), "zip");
        assert_eq!(DownloadFormat::Dwca.extension(), "zip");
        assert_eq!(DownloadFormat::SimpleTsv.extension(), "tsv");
        assert!(DownloadFormat::Dwca.includes_verbatim());
        assert!(!DownloadFormat::SimpleCsv.includes_verbatim());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::Aggregating {
            key: DownloadKey::new("k1"),
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "aggregating");
        assert_eq!(json["key"], "k1");
    }
}
