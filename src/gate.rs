use std::sync::Arc;

use tokio::sync::Semaphore;

/// Bounded-concurrency admission control for outbound gateway calls.
///
/// The ISG is a single slow, stateful device; hammering it with
/// parallel requests stalls its embedded web server. At most `limit`
/// tasks run concurrently; waiters are admitted in best-effort FIFO
/// order (the semaphore's waiter queue is fair). Completion order is
/// unconstrained, and a finished task (success or failure) releases its
/// slot to the next waiter. Cancellation of an admitted task is the
/// task's own business — typically the per-request timeout.
#[derive(Clone, Debug)]
pub struct FetchGate {
    permits: Arc<Semaphore>,
}

impl FetchGate {
    pub const DEFAULT_LIMIT: usize = 3;

    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Run `task` once a slot is free.
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("fetch gate semaphore is never closed");
        task.await
    }
}

impl Default for FetchGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}
