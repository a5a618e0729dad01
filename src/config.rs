//! Configuration types for occurrence-dl

use crate::error::{Error, Result};
use crate::types::DownloadFormat;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download generation settings (directories, parallelism, job sizing)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Working directory for partial job files (default: "./work")
    ///
    /// Each download gets its own sub-directory, deleted after a successful
    /// aggregation and retained after a failed one.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory receiving finished archives (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Size of the local worker pool (default: 10)
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Minimum number of records a job must cover before another job is split off (default: 200)
    #[serde(default = "default_job_min_records")]
    pub job_min_records: u64,

    /// Hard cap on the number of records a single download may export (default: 200000)
    #[serde(default = "default_max_records")]
    pub max_records: u64,

    /// Format used when a request does not name one
    #[serde(default)]
    pub default_format: DownloadFormat,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
            max_threads: default_max_threads(),
            job_min_records: default_job_min_records(),
            max_records: default_max_records(),
            default_format: DownloadFormat::default(),
        }
    }
}

/// Search backend connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the search cluster (default: "http://localhost:9200")
    #[serde(default = "default_search_url")]
    pub url: String,

    /// Index (or alias) holding occurrence documents (default: "occurrence")
    #[serde(default = "default_search_index")]
    pub index: String,

    /// Number of records fetched per search request (default: 300)
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Timeout applied to every search request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Deepest `from + size` the index serves; pages past it are read with
    /// `search_after` (default: 10000, the `index.max_result_window` default)
    #[serde(default = "default_max_result_window")]
    pub max_result_window: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            index: default_search_index(),
            page_size: default_page_size(),
            request_timeout: default_request_timeout(),
            max_result_window: default_max_result_window(),
        }
    }
}

/// Admission lock settings
///
/// The lock bounds how many jobs, across every process sharing the lock
/// service, query the search backend at the same time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// Name of the cluster-wide counting lock (default: "occurrence-download")
    #[serde(default = "default_lock_name")]
    pub name: String,

    /// Number of holders the lock admits at once (default: 10)
    #[serde(default = "default_lock_permits")]
    pub permits: u32,

    /// Delay between attempts while waiting for a free slot (default: 250ms)
    #[serde(default = "default_poll_interval", with = "millis_serde")]
    pub poll_interval: Duration,

    /// Time without a heartbeat after which a held slot is presumed abandoned
    /// and reclaimed (default: 2 minutes). Holders renew their slot every
    /// third of this.
    #[serde(default = "default_lease_ttl", with = "duration_serde")]
    pub lease_ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: default_lock_name(),
            permits: default_lock_permits(),
            poll_interval: default_poll_interval(),
            lease_ttl: default_lease_ttl(),
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding the download registry and admission locks
    /// (default: "./occurrence-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for the download engine
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directories, parallelism, job sizing
/// - [`search`](SearchConfig) - search cluster connection
/// - [`lock`](LockConfig) - cluster-wide admission control
/// - [`persistence`](PersistenceConfig) - registry database
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download generation settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Search backend settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Admission lock settings
    #[serde(default)]
    pub lock: LockConfig,

    /// Registry storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the partitioner and executor cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_threads == 0 {
            return Err(config_error("max_threads must be at least 1", "max_threads"));
        }
        if self.download.job_min_records == 0 {
            return Err(config_error(
                "job_min_records must be at least 1",
                "job_min_records",
            ));
        }
        if self.download.max_records == 0 {
            return Err(config_error("max_records must be at least 1", "max_records"));
        }
        if self.search.page_size == 0 {
            return Err(config_error("page_size must be at least 1", "page_size"));
        }
        if self.search.page_size > self.search.max_result_window {
            return Err(config_error(
                "page_size must not exceed max_result_window",
                "page_size",
            ));
        }
        if self.lock.permits == 0 {
            return Err(config_error("lock permits must be at least 1", "permits"));
        }
        if self.lock.name.trim().is_empty() {
            return Err(config_error("lock name must not be empty", "name"));
        }
        if self.lock.lease_ttl < Duration::from_secs(1) {
            return Err(config_error("lease_ttl must be at least 1 second", "lease_ttl"));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./work")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_threads() -> usize {
    10
}

fn default_job_min_records() -> u64 {
    200
}

fn default_max_records() -> u64 {
    200_000
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_search_index() -> String {
    "occurrence".to_string()
}

fn default_page_size() -> u64 {
    300
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_result_window() -> u64 {
    10_000
}

fn default_lock_name() -> String {
    "occurrence-download".to_string()
}

fn default_lock_permits() -> u32 {
    10
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_lease_ttl() -> Duration {
    Duration::from_secs(120)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./occurrence-dl.db")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
