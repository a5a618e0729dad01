//! In-process named counting locks

use super::{LockGuard, LockService};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Named counting locks backed by tokio semaphores
///
/// Each name gets its own semaphore with `permits` permits the first time it
/// is acquired. Only bounds concurrency within this process.
pub struct LocalLockService {
    permits: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl LocalLockService {
    /// Create a service whose locks admit `permits` holders each
    pub fn new(permits: usize) -> Self {
        Self {
            permits: permits.max(1),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    async fn semaphore(&self, name: &str) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock().await;
        semaphores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.permits)))
            .clone()
    }

    /// Permits of `name` currently free
    pub async fn available(&self, name: &str) -> usize {
        self.semaphore(name).await.available_permits()
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn acquire(&self, name: &str) -> Result<LockGuard> {
        let permit = self
            .semaphore(name)
            .await
            .acquire_owned()
            .await
            .map_err(|e| Error::LockAcquisition {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(LockGuard::new(name, move || drop(permit)))
    }
}
