//! Shared bounded worker pool
//!
//! The single point of true parallelism: segment fetches from every URL of
//! one `Downloader` run under the same semaphore, sized at twice the
//! machine's available parallelism.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::DownloadError;

/// Number of parallel execution slots to assume when the platform will not
/// say.
const FALLBACK_PARALLELISM: usize = 4;

pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_PARALLELISM)
}

/// Bounded-parallelism executor for segment fetches.
#[derive(Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    parallelism: usize,
}

impl WorkerPool {
    pub fn new(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        debug!(slots = parallelism * 2, "worker pool created");
        Self {
            permits: Arc::new(Semaphore::new(parallelism * 2)),
            parallelism,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Number of concurrent execution slots (`2 * parallelism`).
    pub fn slots(&self) -> usize {
        self.parallelism * 2
    }

    /// Runs `task` once a slot frees up. A task submitted after `close`
    /// resolves to [`DownloadError::PoolClosed`] instead of running.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<Result<(), DownloadError>>
    where
        F: Future<Output = Result<(), DownloadError>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| DownloadError::PoolClosed)?;
            task.await
        })
    }

    /// Shuts the pool down. Idempotent; tasks already holding a slot run to
    /// completion, queued ones fail with [`DownloadError::PoolClosed`].
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_at_most_two_per_parallelism_unit() {
        let pool = WorkerPool::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "pool bound violated");
    }

    #[tokio::test]
    async fn spawn_after_close_fails_without_running() {
        let pool = WorkerPool::new(2);
        pool.close();
        let result = pool.spawn(async { panic!("must not run") }).await.unwrap();
        assert!(matches!(result, Err(DownloadError::PoolClosed)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let pool = WorkerPool::new(2);
        pool.close();
        pool.close();
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn failures_do_not_affect_sibling_tasks() {
        let pool = WorkerPool::new(2);
        let failing = pool.spawn(async {
            Err(DownloadError::SegmentFetch {
                url: "http://x.test/a".into(),
                index: 0,
                message: "boom".into(),
            })
        });
        let ok = pool.spawn(async { Ok(()) });
        assert!(failing.await.unwrap().is_err());
        assert!(ok.await.unwrap().is_ok());
    }
}
