//! Cluster-wide named counting locks
//!
//! Every job holds one permit of a named counting lock while it queries the
//! search backend. The lock is shared by every process generating downloads,
//! so the number of concurrent backend scans is bounded cluster-wide and not
//! only per process.
//!
//! Two implementations are provided:
//! - [`LocalLockService`] - in-process semaphores, for a single node and tests
//! - [`SqliteLockService`] - slots in the shared SQLite database

use crate::error::Result;
use async_trait::async_trait;

mod local;
mod sqlite;

pub use local::LocalLockService;
pub use sqlite::SqliteLockService;

/// Acquisition of named counting locks
///
/// `acquire` waits until a permit is free. It fails with
/// [`Error::LockAcquisition`](crate::Error::LockAcquisition) when the lock
/// service itself is unavailable.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take one permit of the lock `name`, waiting while all are held
    async fn acquire(&self, name: &str) -> Result<LockGuard>;
}

/// One held permit; released when dropped
///
/// Dropping happens on every exit path of the task owning the guard: normal
/// completion, error return, panic unwinding, and task abort.
#[must_use = "the permit is released as soon as the guard is dropped"]
pub struct LockGuard {
    name: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LockGuard {
    /// Create a guard that runs `release` exactly once when dropped
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Name of the lock this permit belongs to
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::trace!(lock = %self.name, "admission permit released");
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("held", &self.release.is_some())
            .finish()
    }
}
