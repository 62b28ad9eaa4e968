use serde::Serialize;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::Error;

/// Bounded pool of execution slots with a bounded wait queue.
///
/// A request that finds every slot busy waits only if fewer than
/// `queue_capacity` requests are already waiting; otherwise it is shed.
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    capacity: usize,
    queue_capacity: usize,
}

/// An acquired execution slot, released on drop
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub queued: usize,
    pub queue_capacity: usize,
}

/// Decrements the waiting counter even when the waiter is cancelled
struct QueuePosition<'a>(&'a AtomicUsize);

impl Drop for QueuePosition<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize, queue_capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            waiting: Arc::new(AtomicUsize::new(0)),
            capacity,
            queue_capacity,
        }
    }

    pub async fn acquire(&self) -> Result<Slot, Error> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(Slot { _permit: permit });
        }

        let position = self.waiting.fetch_add(1, Ordering::AcqRel);
        let _queued = QueuePosition(&self.waiting);
        if position >= self.queue_capacity {
            warn!(
                queued = position,
                queue_capacity = self.queue_capacity,
                "Execution queue full, shedding request"
            );
            return Err(Error::LoadShed);
        }

        debug!(position, "Waiting for an execution slot");
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Sandbox(format!("Failed to acquire execution permit: {}", e)))?;
        Ok(Slot { _permit: permit })
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            available: self.semaphore.available_permits(),
            queued: self.waiting.load(Ordering::Acquire),
            queue_capacity: self.queue_capacity,
        }
    }
}
