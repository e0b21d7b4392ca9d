use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::CoreError;

/// Counting semaphore bounding in-flight operations on one device.
///
/// The permit returned by [`enter`](Self::enter) is released when dropped,
/// so every exit path of the guarded operation gives its ticket back.
#[derive(Debug)]
pub(crate) struct ConcurrencyGate {
    permits: Semaphore,
    capacity: usize,
}

impl ConcurrencyGate {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Semaphore::new(capacity),
            capacity,
        }
    }

    pub(crate) async fn enter(&self) -> Result<SemaphorePermit<'_>, CoreError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| CoreError::Internal("concurrency gate closed".into()))
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
