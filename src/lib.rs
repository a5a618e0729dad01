//! # occurrence-dl
//!
//! Occurrence download engine: turns a saved search over an occurrence index
//! into one downloadable archive.
//!
//! ## Pipeline
//!
//! - **Compile** - a [`Predicate`] tree becomes a [`CompiledQuery`] (structured
//!   search document plus legacy query string)
//! - **Partition** - the matching records are split into contiguous jobs
//! - **Execute** - jobs run on a bounded local pool, each holding one permit
//!   of a cluster-wide named counting lock
//! - **Aggregate** - partial files are merged in order into the archive, and
//!   dataset usages and the most restrictive license are recorded
//!
//! ## Quick Start
//!
//! ```no_run
//! use occurrence_dl::{Config, DownloadEngine, DownloadRequest, Predicate, SearchParameter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DownloadEngine::from_config(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let request = DownloadRequest::new(Predicate::and(vec![
//!         Predicate::equals(SearchParameter::Country, "DK"),
//!         Predicate::greater_than_or_equals(SearchParameter::Year, "2000"),
//!     ]));
//!     let (key, summary) = engine.run(request).await?;
//!     println!("{key}: {} records in {}", summary.records, summary.archive.display());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive and work-directory file operations
pub mod archive;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Download generation pipeline
pub mod download;
/// Error types
pub mod error;
/// Dataset licenses
pub mod license;
/// Cluster-wide admission locks
pub mod lock;
/// Predicate model
pub mod predicate;
/// Predicate to search query compilation
pub mod query;
/// Download registry
pub mod registry;
/// Search backend access
pub mod search;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, LockConfig, PersistenceConfig, SearchConfig};
pub use db::Database;
pub use download::{
    Aggregator, ArchiveSummary, DatasetUsagesCollector, DownloadEngine, DownloadRequest,
    FileJob, JobExecutor, JobResult, JobWriter, SearchJobWriter, partition,
};
pub use error::{DatabaseError, Error, Result};
pub use license::{License, LicenseSelector};
pub use lock::{LocalLockService, LockGuard, LockService, SqliteLockService};
pub use predicate::{Predicate, SearchParameter};
pub use query::{CompiledQuery, QueryCompiler};
pub use registry::{DownloadRecord, Registry, SqliteRegistry};
pub use search::{ElasticsearchBackend, InMemorySearchBackend, OccurrenceRecord, SearchBackend};
pub use types::{DatasetKey, DownloadFormat, DownloadKey, DownloadStatus, Event};
