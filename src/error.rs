//! Error types for occurrence-dl
//!
//! This module provides the error taxonomy of the download engine:
//! - Compilation errors (invalid geometry, unsupported predicate)
//! - Execution errors (job failure, admission lock failure, cancellation)
//! - Aggregation and persistence errors
//! - Wrapped infrastructure errors (I/O, SQLite, HTTP, zip, JSON)

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for occurrence-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for occurrence-dl
///
/// Each variant carries enough context to diagnose a failed download without
/// re-running it.
#[derive(Debug, Error)]
pub enum Error {
    /// A `within` predicate carried WKT that does not describe a usable geometry
    #[error("invalid geometry: {reason}")]
    InvalidGeometry {
        /// The offending WKT text (truncated for very large geometries)
        wkt: String,
        /// Why the geometry was rejected
        reason: String,
    },

    /// A predicate node this engine does not know how to compile
    #[error("unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    /// A single job's writer failed; the whole download fails with it
    #[error("job {job_index} ({from}..{to}) failed: {reason}")]
    JobExecution {
        /// Index of the failed job within the download
        job_index: usize,
        /// First record offset of the job
        from: u64,
        /// Exclusive end offset of the job
        to: u64,
        /// The underlying failure
        reason: String,
    },

    /// The admission lock service could not be reached or refused the lock
    #[error("failed to acquire admission lock '{name}': {reason}")]
    LockAcquisition {
        /// Name of the cluster-wide lock
        name: String,
        /// The underlying failure
        reason: String,
    },

    /// Merging partial files or building the archive failed
    ///
    /// Partial files are left in `work_dir` for diagnosis.
    #[error("aggregation failed: {reason}")]
    Aggregation {
        /// The underlying failure
        reason: String,
        /// Working directory that still holds the partial files
        work_dir: PathBuf,
    },

    /// Persisting dataset usages or the selected license failed (non-fatal)
    #[error("failed to persist usages for download {download_key}: {reason}")]
    UsagePersist {
        /// The download whose bookkeeping failed
        download_key: String,
        /// The underlying failure
        reason: String,
    },

    /// The download was cancelled before it completed
    #[error("download cancelled")]
    Cancelled,

    /// The search backend failed or returned an unusable response
    #[error("search backend error: {0}")]
    Search(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_threads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip container error
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Download not found
    #[error("download not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Build an [`Error::InvalidGeometry`], truncating huge WKT payloads
    pub fn invalid_geometry(wkt: &str, reason: impl Into<String>) -> Self {
        const MAX_WKT_IN_ERROR: usize = 120;
        let wkt = if wkt.len() > MAX_WKT_IN_ERROR {
            let mut end = MAX_WKT_IN_ERROR;
            while !wkt.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &wkt[..end])
        } else {
            wkt.to_string()
        };
        Error::InvalidGeometry {
            wkt,
            reason: reason.into(),
        }
    }

    /// Whether this error should abort the download (as opposed to being logged)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::UsagePersist { .. })
    }

    /// Machine-readable error code, used in failure events and the registry
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidGeometry { .. } => "invalid_geometry",
            Error::UnsupportedPredicate(_) => "unsupported_predicate",
            Error::JobExecution { .. } => "job_execution",
            Error::LockAcquisition { .. } => "lock_acquisition",
            Error::Aggregation { .. } => "aggregation",
            Error::UsagePersist { .. } => "usage_persist",
            Error::Cancelled => "cancelled",
            Error::Search(_) => "search",
            Error::Config { .. } => "config",
            Error::Database(_) | Error::Sqlx(_) => "database",
            Error::Io(_) => "io",
            Error::Archive(_) => "archive",
            Error::Network(_) => "network",
            Error::Serialization(_) => "serialization",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "internal_error",
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_geometry_truncates_long_wkt() {
        let wkt = format!("POLYGON(({}))", "1 2,".repeat(200));

        let err = Error::invalid_geometry(&wkt, "ring not closed");

        match err {
            Error::InvalidGeometry { wkt, reason } => {
                assert!(wkt.ends_with("..."));
                assert!(wkt.len() <= 123);
                assert_eq!(reason, "ring not closed");
            }
            other => panic!("expected InvalidGeometry, got {other:?}"),
        }
    }

    #[test]
    fn usage_persist_is_the_only_non_fatal_error() {
        let non_fatal = Error::UsagePersist {
            download_key: "k".into(),
            reason: "registry down".into(),
        };
        assert!(!non_fatal.is_fatal());
        assert!(Error::Cancelled.is_fatal());
        assert!(
            Error::Aggregation {
                reason: "zip".into(),
                work_dir: PathBuf::from("/tmp/x"),
            }
            .is_fatal()
        );
    }

    #[test]
    fn job_execution_message_names_the_range() {
        let err = Error::JobExecution {
            job_index: 2,
            from: 400,
            to: 600,
            reason: "backend timeout".into(),
        };

        assert_eq!(err.to_string(), "job 2 (400..600) failed: backend timeout");
        assert_eq!(err.code(), "job_execution");
    }

    #[test]
    fn io_errors_convert_via_question_mark() {
        fn fails() -> Result<()> {
            Err(std::io::Error::other("disk gone"))?;
            Ok(())
        }

        let err = fails().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), "io");
    }
}
