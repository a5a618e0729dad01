//! Splitting a download's result set into jobs
//!
//! Records are spread evenly over as many jobs as the worker limit allows,
//! while keeping at least `min_records_per_job` records per job. When the
//! count doesn't divide evenly, the first jobs take one extra record each.

use super::job::FileJob;
use crate::error::Result;
use crate::query::CompiledQuery;
use crate::types::DownloadKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Plan the jobs of a download
///
/// At most `max_total_records` records are exported. Returns no jobs when
/// nothing is to be exported.
pub fn partition(
    download_key: &DownloadKey,
    query: Arc<CompiledQuery>,
    total_records: u64,
    worker_limit: usize,
    min_records_per_job: u64,
    max_total_records: u64,
    work_dir: &Path,
) -> Result<Vec<FileJob>> {
    let effective_total = total_records.min(max_total_records);
    if effective_total == 0 {
        return Ok(Vec::new());
    }

    let worker_limit = worker_limit.max(1) as u64;
    let min_records_per_job = min_records_per_job.max(1);
    let workers = if effective_total <= min_records_per_job {
        1
    } else {
        worker_limit.min(effective_total / min_records_per_job)
    };

    let base_chunk = (effective_total / workers).max(1);
    let mut remaining = effective_total.saturating_sub(base_chunk * workers);
    let per_job_extra = (remaining / workers).max(1);

    let mut jobs = Vec::with_capacity(workers as usize);
    let mut from = 0;
    for index in 0..workers as usize {
        let extra = per_job_extra.min(remaining);
        remaining -= extra;
        let to = from + base_chunk + extra;
        let (interpreted, verbatim) = job_files(work_dir, download_key, index);
        jobs.push(FileJob::new(index, query.clone(), from, to, interpreted, verbatim)?);
        from = to;
    }

    tracing::debug!(
        download_key = %download_key,
        total_records,
        effective_total,
        jobs = jobs.len(),
        base_chunk,
        "download partitioned"
    );
    Ok(jobs)
}

/// Partial file paths of job `index`
pub fn job_files(work_dir: &Path, download_key: &DownloadKey, index: usize) -> (PathBuf, PathBuf) {
    (
        work_dir.join(format!("{download_key}_{index}.interpreted.part")),
        work_dir.join(format!("{download_key}_{index}.verbatim.part")),
    )
}
