//! Worker pool capping concurrent stage executions.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A semaphore-bounded pool of stage workers.
///
/// The dispatcher hands work here and returns immediately; long-running
/// side effects never block the scan loop. When all permits are taken the
/// spawn is refused and the dispatcher retries on its next scan.
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    cancellation: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            cancellation: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Try to run a unit of work on the pool. Returns false when the pool
    /// is saturated or shutting down.
    pub fn try_spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancellation.is_cancelled() {
            return false;
        }
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => return false,
        };

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return false;
        };
        // Reap finished workers so the set doesn't grow without bound.
        while join_set.try_join_next().is_some() {}
        join_set.spawn(async move {
            let _permit = permit;
            fut.await;
        });
        true
    }

    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation.is_cancelled()
    }

    /// Stop accepting work and wait for in-flight workers to finish.
    pub async fn stop(&self) {
        info!("Stopping worker pool");
        self.cancellation.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_pool_caps_concurrency() {
        let pool = WorkerPool::new(2);
        let (tx, _rx) = tokio::sync::broadcast::channel::<()>(1);

        for _ in 0..2 {
            let mut release = tx.subscribe();
            assert!(pool.try_spawn(async move {
                let _ = release.recv().await;
            }));
        }
        // Pool is full now.
        assert!(!pool.try_spawn(async {}));
        assert_eq!(pool.available_workers(), 0);

        tx.send(()).unwrap();
        // Workers release their permits once they finish.
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while pool.available_workers() < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stop_waits_for_workers() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = counter.clone();
            assert!(pool.try_spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(!pool.is_running());
        assert!(!pool.try_spawn(async {}));
    }
}
