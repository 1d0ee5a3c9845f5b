//! Caps simultaneous outbound provider calls.
//! Waiters are admitted in FIFO order (tokio's semaphore is fair); the permit
//! is released when the guarded future finishes, errors, or unwinds.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Run `fut` once a slot is free.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is owned by `self` and never closed.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("limiter semaphore closed");
        fut.await
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn in_flight(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }
}
