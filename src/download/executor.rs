//! Admission-controlled job execution
//!
//! Jobs run on a local pool bounded by `max_threads`. Before a job is
//! dispatched, the submitting loop takes one permit of the cluster-wide named
//! counting lock; the permit moves into the job's task and is released when
//! the task ends, however it ends.

use super::job::{FileJob, JobResult};
use super::writer::JobWriter;
use crate::error::{Error, Result};
use crate::lock::LockService;
use crate::types::{DownloadKey, Event};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Runs the jobs of one download
pub struct JobExecutor {
    max_threads: usize,
    lock: Arc<dyn LockService>,
    lock_name: String,
    events: Option<(DownloadKey, broadcast::Sender<Event>)>,
}

impl JobExecutor {
    /// Create an executor running at most `max_threads` jobs locally, each
    /// holding a permit of the lock `lock_name`
    pub fn new(max_threads: usize, lock: Arc<dyn LockService>, lock_name: impl Into<String>) -> Self {
        Self {
            max_threads: max_threads.max(1),
            lock,
            lock_name: lock_name.into(),
            events: None,
        }
    }

    /// Emit job events for `key` on `event_tx`
    pub fn with_events(mut self, key: DownloadKey, event_tx: broadcast::Sender<Event>) -> Self {
        self.events = Some((key, event_tx));
        self
    }

    /// Run every job and wait for all of them
    ///
    /// The first failure stops the run: queued jobs are never started and
    /// running ones are aborted. Every permit is released before this returns.
    /// Results come back in completion order.
    pub async fn run(
        &self,
        jobs: Vec<FileJob>,
        writer: Arc<dyn JobWriter>,
        cancel: CancellationToken,
    ) -> Result<Vec<JobResult>> {
        let mut state = RunState {
            running: JoinSet::new(),
            in_flight: HashMap::new(),
            results: Vec::with_capacity(jobs.len()),
        };

        match self.drive(jobs, writer, &cancel, &mut state).await {
            Ok(()) => Ok(state.results),
            Err(e) => {
                let aborted = state.running.len();
                state.running.shutdown().await;
                tracing::warn!(
                    error = %e,
                    aborted,
                    completed = state.results.len(),
                    "job execution stopped"
                );
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        jobs: Vec<FileJob>,
        writer: Arc<dyn JobWriter>,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        let pool = Arc::new(Semaphore::new(self.max_threads));

        for job in jobs {
            let permit = self
                .wait_for(state, cancel, async {
                    pool.clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Other(format!("worker pool closed: {}", e)))
                })
                .await?;
            let guard = self
                .wait_for(state, cancel, self.lock.acquire(&self.lock_name))
                .await?;

            tracing::debug!(
                job_index = job.index(),
                from = job.from(),
                to = job.to(),
                lock = %self.lock_name,
                "job admitted"
            );
            self.emit(|key| Event::JobStarted {
                key,
                job_index: job.index(),
                from: job.from(),
                to: job.to(),
            });

            let writer = Arc::clone(&writer);
            let task_job = job.clone();
            let handle = state.running.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                writer.write(&task_job).await.map_err(|e| match e {
                    e @ Error::JobExecution { .. } => e,
                    other => task_job.failure(other),
                })
            });
            state.in_flight.insert(handle.id(), job);
        }

        while !state.running.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                Some(joined) = state.running.join_next_with_id() => self.collect(state, joined)?,
            }
        }
        Ok(())
    }

    /// Wait for `future` while collecting finished jobs, so that a failure
    /// is noticed even while the submitting loop is blocked
    async fn wait_for<T>(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::pin!(future);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                Some(joined) = state.running.join_next_with_id(), if !state.running.is_empty() => {
                    self.collect(state, joined)?;
                }
                value = &mut future => return value,
            }
        }
    }

    fn collect(
        &self,
        state: &mut RunState,
        joined: std::result::Result<(Id, Result<JobResult>), JoinError>,
    ) -> Result<()> {
        let result = match joined {
            Ok((id, outcome)) => {
                state.in_flight.remove(&id);
                outcome?
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    "writer panicked".to_string()
                } else {
                    format!("task aborted: {}", e)
                };
                return Err(match state.in_flight.remove(&e.id()) {
                    Some(job) => job.failure(reason),
                    None => Error::Other(reason),
                });
            }
        };

        tracing::debug!(
            job_index = result.job.index(),
            records = result.records,
            "job completed"
        );
        self.emit(|key| Event::JobCompleted {
            key,
            job_index: result.job.index(),
            records: result.records,
        });
        state.results.push(result);
        Ok(())
    }

    fn emit(&self, event: impl FnOnce(DownloadKey) -> Event) {
        if let Some((key, event_tx)) = &self.events {
            // no subscribers is fine
            event_tx.send(event(key.clone())).ok();
        }
    }
}

struct RunState {
    running: JoinSet<Result<JobResult>>,
    in_flight: HashMap<Id, FileJob>,
    results: Vec<JobResult>,
}
