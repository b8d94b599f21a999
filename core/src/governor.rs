//! Global throttle for in-flight tool invocations.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::errors::EngineError;

/// One semaphore bounds every external invocation across the whole run,
/// including fan-out sub-tasks, so the concurrency ceiling holds globally.
#[derive(Clone)]
pub struct Governor {
    sem: Arc<Semaphore>,
    permits: usize,
}

impl Governor {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Governor {
            sem: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Wait for a permit. Returns `Cancelled` as soon as the run's token
    /// fires so a stopping run never stalls behind the queue.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, EngineError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            permit = self.sem.clone().acquire_owned() => {
                permit.map_err(|_| EngineError::Cancelled)
            }
        }
    }
}
