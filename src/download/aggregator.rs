//! Merging job results into the final archive
//!
//! Partial files are concatenated in job order under a single header line,
//! so the archive lists records in the same order as an unpartitioned run.

use super::job::{FileJob, JobResult};
use super::usages::DatasetUsagesCollector;
use super::writer::{INTERPRETED_TERMS, VERBATIM_TERMS, header_line};
use crate::archive::{self, ArchiveEntry};
use crate::error::{Error, Result};
use crate::license::{License, LicenseSelector};
use crate::registry::Registry;
use crate::types::{DatasetKey, DownloadFormat, DownloadKey};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INTERPRETED_FILENAME: &str = "occurrence.txt";
const VERBATIM_FILENAME: &str = "verbatim.txt";
const DESCRIPTOR_FILENAME: &str = "meta.xml";
const RIGHTS_FILENAME: &str = "rights.txt";

/// What the aggregator produced
#[derive(Clone, Debug)]
pub struct ArchiveSummary {
    /// Final artifact
    pub archive: PathBuf,
    /// Records in the artifact
    pub records: u64,
    /// Artifact size in bytes
    pub size: u64,
    /// Hex SHA-256 of the artifact
    pub checksum: String,
    /// Most restrictive license of the contributing datasets
    pub license: License,
    /// Records per contributing dataset
    pub dataset_usages: BTreeMap<DatasetKey, u64>,
}

/// Builds the archive of one download from its job results
pub struct Aggregator {
    download_key: DownloadKey,
    format: DownloadFormat,
    work_dir: PathBuf,
    registry: Arc<dyn Registry>,
}

impl Aggregator {
    /// Create an aggregator for the download `download_key`, whose partial
    /// files live in `work_dir`
    pub fn new(
        download_key: DownloadKey,
        format: DownloadFormat,
        work_dir: impl Into<PathBuf>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            download_key,
            format,
            work_dir: work_dir.into(),
            registry,
        }
    }

    /// Merge `results` into the archive at `target`
    ///
    /// Fails with [`Error::Aggregation`] when merging or archiving fails; the
    /// working directory is then kept. Failing to persist usages or the
    /// license is only logged.
    pub async fn aggregate(&self, mut results: Vec<JobResult>, target: &Path) -> Result<ArchiveSummary> {
        results.sort();

        let mut collector = DatasetUsagesCollector::new();
        let mut records = 0;
        for result in &results {
            collector.sum_usages(&result.dataset_usages);
            collector.merge_licenses(&result.dataset_licenses);
            records += result.records;
        }
        let (dataset_usages, licenses) = collector.into_parts();

        let mut selector = LicenseSelector::default();
        licenses.iter().for_each(|license| selector.collect(*license));
        let license = selector.selected();

        let plan = BuildPlan {
            download_key: self.download_key.clone(),
            format: self.format,
            work_dir: self.work_dir.clone(),
            target: target.to_path_buf(),
            license,
            results,
        };
        let work_dir = self.work_dir.clone();
        let (size, checksum) = tokio::task::spawn_blocking(move || plan.build())
            .await
            .map_err(|e| Error::Aggregation {
                reason: format!("archive task failed: {}", e),
                work_dir: work_dir.clone(),
            })?
            .map_err(|e| Error::Aggregation {
                reason: e.to_string(),
                work_dir,
            })?;

        tracing::info!(
            download_key = %self.download_key,
            archive = %target.display(),
            records,
            size,
            license = %license,
            datasets = dataset_usages.len(),
            "archive created"
        );

        if let Err(e) = self.persist(&dataset_usages, &licenses, license).await {
            tracing::warn!(
                download_key = %self.download_key,
                error = %e,
                "download bookkeeping not persisted"
            );
        }

        let cleanup_dir = self.work_dir.clone();
        let cleanup = tokio::task::spawn_blocking(move || archive::delete_directory(&cleanup_dir))
            .await
            .map_err(|e| Error::Other(e.to_string()))
            .and_then(|deleted| deleted);
        if let Err(e) = cleanup {
            tracing::warn!(
                work_dir = %self.work_dir.display(),
                error = %e,
                "failed to delete work directory"
            );
        }

        Ok(ArchiveSummary {
            archive: target.to_path_buf(),
            records,
            size,
            checksum,
            license,
            dataset_usages,
        })
    }

    async fn persist(
        &self,
        usages: &BTreeMap<DatasetKey, u64>,
        licenses: &BTreeSet<License>,
        license: License,
    ) -> Result<()> {
        let persist_error = |e: Error| Error::UsagePersist {
            download_key: self.download_key.to_string(),
            reason: e.to_string(),
        };

        self.registry
            .create_usages(&self.download_key, usages)
            .await
            .map_err(persist_error)?;

        let mut record = self
            .registry
            .get(&self.download_key)
            .await
            .map_err(persist_error)?;
        record.license = Some(license);
        self.registry.update(&record).await.map_err(persist_error)?;

        tracing::debug!(
            download_key = %self.download_key,
            licenses = ?licenses,
            selected = %license,
            "license persisted"
        );
        Ok(())
    }
}

/// Everything the blocking archive step needs
struct BuildPlan {
    download_key: DownloadKey,
    format: DownloadFormat,
    work_dir: PathBuf,
    target: PathBuf,
    license: License,
    results: Vec<JobResult>,
}

impl BuildPlan {
    fn build(self) -> Result<(u64, String)> {
        std::fs::create_dir_all(&self.work_dir)?;
        if let Some(parent) = self.target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let interpreted = self.work_dir.join(INTERPRETED_FILENAME);
        merge(
            &self.results,
            &header_line(INTERPRETED_TERMS),
            FileJob::interpreted_file,
            &interpreted,
        )?;

        let size = match self.format {
            DownloadFormat::SimpleTsv => archive::create_single_file(&interpreted, &self.target)?,
            DownloadFormat::SimpleCsv => archive::create_zip_archive(
                &[ArchiveEntry::file(
                    format!("{}.csv", self.download_key),
                    &interpreted,
                )],
                &self.target,
            )?,
            DownloadFormat::Dwca => {
                let verbatim = self.work_dir.join(VERBATIM_FILENAME);
                merge(
                    &self.results,
                    &header_line(VERBATIM_TERMS),
                    FileJob::verbatim_file,
                    &verbatim,
                )?;
                archive::create_zip_archive(
                    &[
                        ArchiveEntry::file(INTERPRETED_FILENAME, &interpreted),
                        ArchiveEntry::file(VERBATIM_FILENAME, &verbatim),
                        ArchiveEntry::bytes(
                            DESCRIPTOR_FILENAME,
                            archive::dwca_meta_xml(
                                INTERPRETED_FILENAME,
                                INTERPRETED_TERMS,
                                VERBATIM_FILENAME,
                                VERBATIM_TERMS,
                            ),
                        ),
                        ArchiveEntry::bytes(RIGHTS_FILENAME, rights_text(self.license)),
                    ],
                    &self.target,
                )?
            }
        };

        let checksum = archive::sha256_file(&self.target)?;
        Ok((size, checksum))
    }
}

/// Write `header` and then every result's partial file, in result order
fn merge(
    results: &[JobResult],
    header: &str,
    partial: impl Fn(&FileJob) -> &Path,
    target: &Path,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(target)?);
    out.write_all(header.as_bytes())?;
    for result in results {
        archive::append_file(partial(&result.job), &mut out)?;
    }
    out.flush()?;
    Ok(())
}

fn rights_text(license: License) -> String {
    match license.legal_code() {
        Some(url) => format!(
            "This download is made available under the {} license.\nLegal code: {}\n",
            license, url
        ),
        None => format!("This download is made available under the {} license.\n", license),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
