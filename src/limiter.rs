//! Global bound on in-flight subject processes.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admits at most `bound` executions at a time.
///
/// Waiters are admitted in the order they started waiting. A slot is freed
/// when the permit returned by [`Limiter::admit`] is dropped.
#[derive(Debug, Clone)]
pub struct Limiter {
    slots: Arc<Semaphore>,
    bound: usize,
}

impl Limiter {
    pub fn new(bound: usize) -> Self {
        let bound = bound.max(1);
        Self {
            slots: Arc::new(Semaphore::new(bound)),
            bound,
        }
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Number of executions currently admitted.
    pub fn in_flight(&self) -> usize {
        self.bound - self.slots.available_permits()
    }

    pub async fn admit(&self) -> OwnedSemaphorePermit {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore is never closed")
    }
}
