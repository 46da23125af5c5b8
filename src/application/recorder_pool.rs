// Bounded execution context for recorders
use super::recorder::RecorderError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Caps how many recorders run at once. The results writer and graph timers
/// run outside the cap.
#[derive(Debug, Clone)]
pub struct RecorderPool {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// A reserved pool slot, released on drop.
#[derive(Debug)]
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
}

impl RecorderPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Never waits: a full pool is an error, not a queue.
    pub fn try_reserve(&self) -> Result<PoolSlot, RecorderError> {
        self.slots
            .clone()
            .try_acquire_owned()
            .map(|permit| PoolSlot { _permit: permit })
            .map_err(|_| RecorderError::AtCapacity { max: self.capacity })
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(task)
    }
}
