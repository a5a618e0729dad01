//! Units of work of a download and their results

use crate::error::{Error, Result};
use crate::license::License;
use crate::query::CompiledQuery;
use crate::types::DatasetKey;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A contiguous range `[from, to)` of the query's results, written by one job
///
/// Jobs of a download partition `[0, total)` without gaps or overlaps and are
/// ordered by `from`.
#[derive(Clone, Debug)]
pub struct FileJob {
    index: usize,
    query: Arc<CompiledQuery>,
    from: u64,
    to: u64,
    interpreted_file: PathBuf,
    verbatim_file: PathBuf,
}

impl FileJob {
    /// Create a job; fails when `to < from`
    pub fn new(
        index: usize,
        query: Arc<CompiledQuery>,
        from: u64,
        to: u64,
        interpreted_file: PathBuf,
        verbatim_file: PathBuf,
    ) -> Result<Self> {
        if to < from {
            return Err(Error::Other(format!(
                "job {index}: range end {to} is before start {from}"
            )));
        }
        Ok(Self {
            index,
            query,
            from,
            to,
            interpreted_file,
            verbatim_file,
        })
    }

    /// Position of the job within its download
    pub fn index(&self) -> usize {
        self.index
    }

    /// The compiled query, shared by every job of the download
    pub fn query(&self) -> &CompiledQuery {
        &self.query
    }

    /// First record offset (inclusive)
    pub fn from(&self) -> u64 {
        self.from
    }

    /// End record offset (exclusive)
    pub fn to(&self) -> u64 {
        self.to
    }

    /// Number of records in the range
    pub fn len(&self) -> u64 {
        self.to - self.from
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.to == self.from
    }

    /// Partial file receiving interpreted rows
    pub fn interpreted_file(&self) -> &Path {
        &self.interpreted_file
    }

    /// Partial file receiving verbatim rows
    pub fn verbatim_file(&self) -> &Path {
        &self.verbatim_file
    }

    /// Wrap a writer failure with this job's range
    pub fn failure(&self, reason: impl std::fmt::Display) -> Error {
        Error::JobExecution {
            job_index: self.index,
            from: self.from,
            to: self.to,
            reason: reason.to_string(),
        }
    }
}

impl PartialEq for FileJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FileJob {}

impl PartialOrd for FileJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileJob {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.from, self.to, self.index).cmp(&(other.from, other.to, other.index))
    }
}

/// What a finished job produced
#[derive(Clone, Debug)]
pub struct JobResult {
    /// The job, which also names its partial files
    pub job: FileJob,
    /// Records actually written
    pub records: u64,
    /// Records per contributing dataset
    pub dataset_usages: BTreeMap<DatasetKey, u64>,
    /// Distinct licenses seen
    pub dataset_licenses: BTreeSet<License>,
}

impl PartialEq for JobResult {
    fn eq(&self, other: &Self) -> bool {
        self.job == other.job
    }
}

impl Eq for JobResult {}

impl PartialOrd for JobResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobResult {
    fn cmp(&self, other: &Self) -> Ordering {
        self.job.cmp(&other.job)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;
    use crate::query::QueryCompiler;

    fn query() -> Arc<CompiledQuery> {
        Arc::new(QueryCompiler::new().compile(&Predicate::and(vec![])).unwrap())
    }

    fn job(index: usize, from: u64, to: u64) -> FileJob {
        FileJob::new(index, query(), from, to, "i".into(), "v".into()).unwrap()
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = FileJob::new(0, query(), 10, 5, "i".into(), "v".into()).unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn empty_range_is_allowed() {
        let job = job(0, 7, 7);
        assert!(job.is_empty());
        assert_eq!(job.len(), 0);
    }

    #[test]
    fn results_sort_by_start_offset() {
        let mut results: Vec<JobResult> = [job(2, 200, 300), job(0, 0, 100), job(1, 100, 200)]
            .into_iter()
            .map(|job| JobResult {
                job,
                records: 0,
                dataset_usages: BTreeMap::new(),
                dataset_licenses: BTreeSet::new(),
            })
            .collect();

        results.sort();

        let starts: Vec<u64> = results.iter().map(|r| r.job.from()).collect();
        assert_eq!(starts, vec![0, 100, 200]);
    }

    #[test]
    fn failure_carries_range() {
        let err = job(3, 30, 40).failure("timeout");
        assert_eq!(err.to_string(), "job 3 (30..40) failed: timeout");
    }
}
