use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Counting semaphore bounding how many candidates upload at once
#[derive(Debug, Clone)]
pub struct UploadLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held upload slot, released when dropped on any exit path
#[derive(Debug)]
pub struct UploadSlot {
    _permit: OwnedSemaphorePermit,
}

impl UploadLimiter {
    /// A capacity of zero is raised to one so the pipeline can make progress
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        UploadLimiter {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<UploadSlot, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(UploadSlot { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}
