//! Per-job writers
//!
//! A writer runs the compiled query over one job's range and serialises the
//! records into the job's partial files. Partial files carry rows only; the
//! aggregator writes the header line once.

use super::job::{FileJob, JobResult};
use super::usages::DatasetUsagesCollector;
use crate::error::Result;
use crate::search::{OccurrenceRecord, SearchBackend};
use crate::types::DownloadFormat;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Interpreted columns, in file order
pub const INTERPRETED_TERMS: &[&str] = &[
    "gbifID",
    "datasetKey",
    "occurrenceID",
    "kingdom",
    "phylum",
    "class",
    "order",
    "family",
    "genus",
    "species",
    "scientificName",
    "taxonRank",
    "countryCode",
    "locality",
    "decimalLatitude",
    "decimalLongitude",
    "elevation",
    "eventDate",
    "year",
    "month",
    "day",
    "basisOfRecord",
    "institutionCode",
    "collectionCode",
    "catalogNumber",
    "recordNumber",
    "recordedBy",
    "license",
];

/// Verbatim columns, in file order; the first column is the record id
pub const VERBATIM_TERMS: &[&str] = &[
    "gbifID",
    "occurrenceID",
    "catalogNumber",
    "recordNumber",
    "recordedBy",
    "scientificName",
    "country",
    "locality",
    "decimalLatitude",
    "decimalLongitude",
    "eventDate",
    "basisOfRecord",
    "institutionCode",
];

/// Header line for a list of columns
pub fn header_line(terms: &[&str]) -> String {
    let mut line = terms.join("\t");
    line.push('\n');
    line
}

/// Writes one job's records into its partial files
#[async_trait]
pub trait JobWriter: Send + Sync {
    /// Write the records of `job`'s range
    async fn write(&self, job: &FileJob) -> Result<JobResult>;
}

/// Writer reading pages from a [`SearchBackend`]
pub struct SearchJobWriter {
    backend: Arc<dyn SearchBackend>,
    page_size: u64,
    format: DownloadFormat,
}

impl SearchJobWriter {
    /// Create a writer fetching `page_size` records per request
    pub fn new(backend: Arc<dyn SearchBackend>, page_size: u64, format: DownloadFormat) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
            format,
        }
    }
}

#[async_trait]
impl JobWriter for SearchJobWriter {
    async fn write(&self, job: &FileJob) -> Result<JobResult> {
        let mut interpreted = create_partial(job.interpreted_file()).await?;
        let mut verbatim = if self.format.includes_verbatim() {
            Some(create_partial(job.verbatim_file()).await?)
        } else {
            None
        };

        let mut collector = DatasetUsagesCollector::new();
        let mut records = 0u64;
        let mut offset = job.from();
        let mut after: Option<Value> = None;

        while offset < job.to() {
            let size = self.page_size.min(job.to() - offset);
            let page = self
                .backend
                .fetch(job.query(), offset, size, after.as_ref())
                .await?;
            let fetched = page.len() as u64;

            for record in &page {
                interpreted
                    .write_all(interpreted_row(record).as_bytes())
                    .await?;
                if let Some(verbatim) = verbatim.as_mut() {
                    verbatim.write_all(verbatim_row(record).as_bytes()).await?;
                }
                collector.collect_record(record);
            }
            records += fetched;
            offset += fetched;
            after = page.last().and_then(OccurrenceRecord::sort_key).cloned();

            // the index shrank since counting
            if fetched < size {
                tracing::debug!(
                    job_index = job.index(),
                    expected = job.len(),
                    written = records,
                    "search returned fewer records than planned"
                );
                break;
            }
        }

        interpreted.flush().await?;
        if let Some(verbatim) = verbatim.as_mut() {
            verbatim.flush().await?;
        }

        let (dataset_usages, dataset_licenses) = collector.into_parts();
        Ok(JobResult {
            job: job.clone(),
            records,
            dataset_usages,
            dataset_licenses,
        })
    }
}

async fn create_partial(path: &Path) -> Result<BufWriter<tokio::fs::File>> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(BufWriter::new(tokio::fs::File::create(path).await?))
}

fn interpreted_row(record: &OccurrenceRecord) -> String {
    row(INTERPRETED_TERMS.iter().map(|term| record.text(term)))
}

fn verbatim_row(record: &OccurrenceRecord) -> String {
    row(VERBATIM_TERMS.iter().enumerate().map(|(i, term)| {
        if i == 0 {
            record.text(term)
        } else {
            record.verbatim.get(*term).cloned()
        }
    }))
}

fn row(values: impl Iterator<Item = Option<String>>) -> String {
    let mut line = values
        .map(|value| value.map(|v| clean(&v)).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\t");
    line.push('\n');
    line
}

/// Tabs and line breaks would shift columns or rows
fn clean(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::partition::job_files;
    use crate::error::Error;
    use crate::license::License;
    use crate::predicate::Predicate;
    use crate::query::{CompiledQuery, QueryCompiler};
    use crate::search::InMemorySearchBackend;
    use crate::types::{DatasetKey, DownloadKey};
    use tempfile::TempDir;

    fn query() -> Arc<CompiledQuery> {
        Arc::new(QueryCompiler::new().compile(&Predicate::and(vec![])).unwrap())
    }

    fn records(count: u64) -> Vec<OccurrenceRecord> {
        (0..count)
            .map(|i| {
                OccurrenceRecord::new()
                    .with("gbifID", i)
                    .with("datasetKey", DatasetKey::from_u128(u128::from(i % 2)).to_string())
                    .with("license", if i % 2 == 0 { "CC0_1_0" } else { "CC_BY_4_0" })
                    .with_verbatim("recordedBy", format!("collector {i}"))
            })
            .collect()
    }

    fn job(dir: &TempDir, index: usize, from: u64, to: u64) -> FileJob {
        let (interpreted, verbatim) = job_files(dir.path(), &DownloadKey::new("k"), index);
        FileJob::new(index, query(), from, to, interpreted, verbatim).unwrap()
    }

    #[tokio::test]
    async fn writes_the_job_range_across_pages() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(InMemorySearchBackend::new(records(10)));
        let writer = SearchJobWriter::new(backend.clone(), 3, DownloadFormat::SimpleCsv);
        let job = job(&dir, 1, 2, 9);

        let result = writer.write(&job).await.unwrap();

        assert_eq!(result.records, 7);
        assert_eq!(backend.fetch_count(), 3);
        let content = std::fs::read_to_string(job.interpreted_file()).unwrap();
        let ids: Vec<&str> = content
            .lines()
            .map(|l| l.split('\t').next().unwrap())
            .collect();
        assert_eq!(ids, vec!["2", "3", "4", "5", "6", "7", "8"]);
        assert!(!job.verbatim_file().exists());
    }

    #[tokio::test]
    async fn collects_usages_and_licenses_per_job() {
        let dir = TempDir::new().unwrap();
        let writer = SearchJobWriter::new(
            Arc::new(InMemorySearchBackend::new(records(5))),
            100,
            DownloadFormat::SimpleCsv,
        );

        let result = writer.write(&job(&dir, 0, 0, 5)).await.unwrap();

        assert_eq!(result.dataset_usages.get(&DatasetKey::from_u128(0)), Some(&3));
        assert_eq!(result.dataset_usages.get(&DatasetKey::from_u128(1)), Some(&2));
        assert!(result.dataset_licenses.contains(&License::Cc0_1_0));
        assert!(result.dataset_licenses.contains(&License::CcBy4_0));
    }

    #[tokio::test]
    async fn dwca_also_writes_verbatim_rows() {
        let dir = TempDir::new().unwrap();
        let writer = SearchJobWriter::new(
            Arc::new(InMemorySearchBackend::new(records(2))),
            100,
            DownloadFormat::Dwca,
        );
        let job = job(&dir, 0, 0, 2);

        writer.write(&job).await.unwrap();

        let verbatim = std::fs::read_to_string(job.verbatim_file()).unwrap();
        let first: Vec<&str> = verbatim.lines().next().unwrap().split('\t').collect();
        assert_eq!(first.len(), VERBATIM_TERMS.len());
        assert_eq!(first[0], "0");
        assert_eq!(first[4], "collector 0");
    }

    /// Backend recording the cursor of every page request
    struct CursorLog {
        inner: InMemorySearchBackend,
        cursors: std::sync::Mutex<Vec<(u64, Option<Value>)>>,
    }

    #[async_trait]
    impl SearchBackend for CursorLog {
        async fn count(&self, query: &CompiledQuery) -> Result<u64> {
            self.inner.count(query).await
        }

        async fn fetch(
            &self,
            query: &CompiledQuery,
            from: u64,
            size: u64,
            after: Option<&Value>,
        ) -> Result<Vec<OccurrenceRecord>> {
            self.cursors.lock().unwrap().push((from, after.cloned()));
            self.inner.fetch(query, from, size, after).await
        }
    }

    #[tokio::test]
    async fn later_pages_continue_from_the_previous_sort_key() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(CursorLog {
            inner: InMemorySearchBackend::new(records(10)),
            cursors: std::sync::Mutex::new(Vec::new()),
        });
        let writer = SearchJobWriter::new(backend.clone(), 3, DownloadFormat::SimpleCsv);

        writer.write(&job(&dir, 1, 2, 9)).await.unwrap();

        let cursors = backend.cursors.lock().unwrap().clone();
        assert_eq!(
            cursors,
            vec![
                (2, None),
                (5, Some(Value::from(4u64))),
                (8, Some(Value::from(7u64))),
            ]
        );
    }

    #[tokio::test]
    async fn short_page_ends_the_job_early() {
        let dir = TempDir::new().unwrap();
        let writer = SearchJobWriter::new(
            Arc::new(InMemorySearchBackend::new(records(4))),
            10,
            DownloadFormat::SimpleCsv,
        );

        let result = writer.write(&job(&dir, 0, 0, 8)).await.unwrap();

        assert_eq!(result.records, 4);
    }

    #[tokio::test]
    async fn backend_failure_is_returned() {
        let dir = TempDir::new().unwrap();
        let writer = SearchJobWriter::new(
            Arc::new(InMemorySearchBackend::new(records(10)).failing_at(6)),
            5,
            DownloadFormat::SimpleCsv,
        );

        let err = writer.write(&job(&dir, 0, 0, 10)).await.unwrap_err();

        assert!(matches!(err, Error::Search(_)));
    }

    #[test]
    fn values_with_separators_are_cleaned() {
        let record = OccurrenceRecord::new()
            .with("gbifID", 1)
            .with("locality", "line one\nline\ttwo");

        let line = interpreted_row(&record);

        assert_eq!(line.matches('\t').count(), INTERPRETED_TERMS.len() - 1);
        assert!(line.contains("line one line two"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn header_lists_columns() {
        assert_eq!(header_line(&["a", "b"]), "a\tb\n");
    }
}
