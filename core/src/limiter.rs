//! Counting permit pool bounding simultaneous in-flight requests.
//!
//! # Design
//! A `PermitPool` is an explicit value owned by whoever needs the bound, so
//! two dispatchers never share a limit by accident. It wraps a tokio
//! `Semaphore`, which needs no runtime: blocking acquisition drives the
//! acquire future on the calling thread. Release happens when the
//! `OwnedSemaphorePermit` inside `Permit` drops, which keeps acquire and
//! release paired even when the holder unwinds.

use std::sync::Arc;

use futures::executor::block_on;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Cloneable handle to a fixed-capacity pool of permits.
#[derive(Debug, Clone)]
pub struct PermitPool {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl PermitPool {
    /// Create a pool with `capacity` permits. A capacity of zero would block
    /// every acquirer forever and is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take one permit, blocking the calling thread until one is free.
    ///
    /// Fails only once the pool has been closed.
    pub fn acquire(&self) -> Result<Permit, AcquireError> {
        let permit = block_on(Arc::clone(&self.sem).acquire_owned())?;
        Ok(Permit(permit))
    }

    /// Take one permit if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.sem).try_acquire_owned().ok().map(Permit)
    }

    /// Refuse further acquisitions and wake every blocked acquirer with an
    /// error. Permits already handed out stay valid.
    pub fn close(&self) {
        self.sem.close();
    }

    pub fn is_closed(&self) -> bool {
        self.sem.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

/// One slot of a `PermitPool`, returned to the pool on drop.
#[derive(Debug)]
pub struct Permit(OwnedSemaphorePermit);
