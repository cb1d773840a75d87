//! Process-wide cap on in-flight chunk requests.
//!
//! Each session already bounds its own concurrency; sharing one
//! [`UploadLimiter`] between orchestrators bounds the sum across sessions.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::UploadError;

#[derive(Debug, Clone)]
pub struct UploadLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl UploadLimiter {
    pub fn new(limit: usize) -> Result<Self, UploadError> {
        if limit == 0 {
            return Err(UploadError::InvalidConfiguration(
                "global upload limit must be at least 1".into(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a slot; the slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, UploadError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| UploadError::SessionCancelled)
    }
}
