//! Download generation
//!
//! [`DownloadEngine`] drives one download from its predicate to the final
//! archive:
//! - [`partition`] - splitting the result set into jobs
//! - [`executor`] - running jobs under the admission lock
//! - [`writer`] - writing one job's partial files
//! - [`aggregator`] - merging partial files into the archive
//! - [`usages`] - per-dataset bookkeeping

pub mod aggregator;
pub mod executor;
pub mod job;
pub mod partition;
pub mod usages;
pub mod writer;

pub use aggregator::{Aggregator, ArchiveSummary};
pub use executor::JobExecutor;
pub use job::{FileJob, JobResult};
pub use partition::partition;
pub use usages::DatasetUsagesCollector;
pub use writer::{JobWriter, SearchJobWriter};

use crate::config::Config;
use crate::db::{Database, NewDownload};
use crate::error::{Error, Result};
use crate::lock::{LockService, SqliteLockService};
use crate::predicate::Predicate;
use crate::query::QueryCompiler;
use crate::registry::{Registry, SqliteRegistry};
use crate::search::{ElasticsearchBackend, SearchBackend};
use crate::types::{DownloadFormat, DownloadKey, DownloadStatus, Event};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// A request for a new download
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    /// Records to export
    pub predicate: Predicate,
    /// Output format; the configured default when `None`
    pub format: Option<DownloadFormat>,
    /// Requesting user
    pub creator: Option<String>,
}

impl DownloadRequest {
    /// A request in the default format
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            format: None,
            creator: None,
        }
    }

    /// Request a specific format
    pub fn with_format(mut self, format: DownloadFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Record the requesting user
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }
}

/// Occurrence download engine (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct DownloadEngine {
    config: Arc<Config>,
    compiler: Arc<QueryCompiler>,
    backend: Arc<dyn SearchBackend>,
    lock: Arc<dyn LockService>,
    registry: Arc<dyn Registry>,
    event_tx: broadcast::Sender<Event>,
    active: Arc<Mutex<HashMap<DownloadKey, CancellationToken>>>,
}

impl DownloadEngine {
    /// Create an engine over explicit collaborators
    pub fn new(
        config: Config,
        backend: Arc<dyn SearchBackend>,
        lock: Arc<dyn LockService>,
        registry: Arc<dyn Registry>,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            config: Arc::new(config),
            compiler: Arc::new(QueryCompiler::new()),
            backend,
            lock,
            registry,
            event_tx,
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Create an engine from configuration alone
    ///
    /// Opens the SQLite database (registry and admission lock) and connects
    /// to the configured search cluster.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        for dir in [&config.download.work_dir, &config.download.output_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                ))
            })?;
        }

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let backend = Arc::new(ElasticsearchBackend::new(&config.search)?);
        let lock = Arc::new(SqliteLockService::new(db.clone(), &config.lock));
        let registry = Arc::new(SqliteRegistry::new(db));

        tracing::info!(
            search = %config.search.url,
            index = %config.search.index,
            lock = %config.lock.name,
            permits = config.lock.permits,
            "download engine initialized"
        );
        Self::new(config, backend, lock, registry)
    }

    /// Subscribe to download events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The engine's configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a download and generate it
    pub async fn run(&self, request: DownloadRequest) -> Result<(DownloadKey, ArchiveSummary)> {
        let key = self.create(&request).await?;
        let summary = self.generate(&key).await?;
        Ok((key, summary))
    }

    /// Register a download in the `Preparing` state
    pub async fn create(&self, request: &DownloadRequest) -> Result<DownloadKey> {
        let key = DownloadKey::generate();
        let format = request.format.unwrap_or(self.config.download.default_format);

        self.registry
            .create(&NewDownload {
                key: key.clone(),
                predicate: request.predicate.to_json()?,
                format: format.as_str().to_string(),
                creator: request.creator.clone(),
            })
            .await?;

        tracing::info!(download_key = %key, format = format.as_str(), "download registered");
        self.emit(Event::DownloadQueued {
            key: key.clone(),
            format,
        });
        Ok(key)
    }

    /// Generate the archive of a registered download
    ///
    /// The predicate and format are read back from the registry. On failure
    /// the download is marked failed and [`Event::DownloadFailed`] is emitted;
    /// on cancellation it is marked cancelled.
    pub async fn generate(&self, key: &DownloadKey) -> Result<ArchiveSummary> {
        let cancel = CancellationToken::new();
        self.active.lock().await.insert(key.clone(), cancel.clone());

        let outcome = self.execute(key, &cancel).await;
        self.active.lock().await.remove(key);

        match outcome {
            Ok(summary) => Ok(summary),
            Err(Error::Cancelled) => {
                tracing::info!(download_key = %key, "download cancelled");
                self.discard_work_dir(key).await;
                self.finish(key, DownloadStatus::Cancelled, None).await;
                self.emit(Event::DownloadCancelled { key: key.clone() });
                Err(Error::Cancelled)
            }
            Err(e) => {
                tracing::error!(download_key = %key, error = %e, "download failed");
                self.finish(key, DownloadStatus::Failed, Some(e.to_string()))
                    .await;
                self.emit(Event::DownloadFailed {
                    key: key.clone(),
                    code: e.code().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Cancel a download being generated
    ///
    /// Returns `false` when the download is not running in this engine.
    pub async fn cancel(&self, key: &DownloadKey) -> bool {
        match self.active.lock().await.get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn execute(&self, key: &DownloadKey, cancel: &CancellationToken) -> Result<ArchiveSummary> {
        let mut record = self.registry.get(key).await?;
        let predicate = Predicate::from_json(&record.predicate)?;
        let query = Arc::new(self.compiler.compile(&predicate)?);
        tracing::debug!(download_key = %key, query = %query.query_string(), "predicate compiled");

        let total_records = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            count = self.backend.count(&query) => count?,
        };

        let settings = &self.config.download;
        let work_dir = settings.work_dir.join(key.as_str());
        tokio::fs::create_dir_all(&work_dir).await?;
        let jobs = partition(
            key,
            query,
            total_records,
            settings.max_threads,
            settings.job_min_records,
            settings.max_records,
            &work_dir,
        )?;

        let exported_records = total_records.min(settings.max_records);
        tracing::info!(
            download_key = %key,
            total_records,
            exported_records,
            jobs = jobs.len(),
            "records counted"
        );
        self.emit(Event::RecordsCounted {
            key: key.clone(),
            total_records,
            exported_records,
            jobs: jobs.len(),
        });

        record.total_records = total_records;
        record.status = DownloadStatus::Running;
        self.registry.update(&record).await?;

        let writer = Arc::new(SearchJobWriter::new(
            self.backend.clone(),
            self.config.search.page_size,
            record.format,
        ));
        let results = JobExecutor::new(settings.max_threads, self.lock.clone(), &self.config.lock.name)
            .with_events(key.clone(), self.event_tx.clone())
            .run(jobs, writer, cancel.clone())
            .await?;

        self.emit(Event::Aggregating { key: key.clone() });
        let target = settings
            .output_dir
            .join(format!("{}.{}", key, record.format.extension()));
        let summary = Aggregator::new(key.clone(), record.format, &work_dir, self.registry.clone())
            .aggregate(results, &target)
            .await?;

        // re-read: the aggregator stored the license
        let mut record = self.registry.get(key).await?;
        record.status = DownloadStatus::Succeeded;
        record.archive_path = Some(summary.archive.clone());
        record.archive_size = Some(summary.size);
        record.checksum = Some(summary.checksum.clone());
        record.license.get_or_insert(summary.license);
        self.registry.update(&record).await?;

        tracing::info!(
            download_key = %key,
            archive = %summary.archive.display(),
            records = summary.records,
            "download complete"
        );
        self.emit(Event::DownloadComplete {
            key: key.clone(),
            archive: summary.archive.clone(),
            total_records: summary.records,
            license: summary.license,
        });
        Ok(summary)
    }

    /// Record a terminal status; failures here are only logged
    async fn finish(&self, key: &DownloadKey, status: DownloadStatus, error: Option<String>) {
        let updated = async {
            let mut record = self.registry.get(key).await?;
            record.status = status;
            record.error_message = error;
            self.registry.update(&record).await
        }
        .await;

        if let Err(e) = updated {
            tracing::warn!(
                download_key = %key,
                status = ?status,
                error = %e,
                "failed to record download status"
            );
        }
    }

    async fn discard_work_dir(&self, key: &DownloadKey) {
        let work_dir = self.config.download.work_dir.join(key.as_str());
        match tokio::fs::remove_dir_all(&work_dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    work_dir = %work_dir.display(),
                    error = %e,
                    "failed to delete work directory"
                );
            }
            _ => {}
        }
    }

    fn emit(&self, event: Event) {
        // no subscribers is fine
        self.event_tx.send(event).ok();
    }
}
