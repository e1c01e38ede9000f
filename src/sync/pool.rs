//! Bounded Worker Pool
//!
//! A fixed number of permits caps how many downloads run at once; every
//! submission gets its own result handle, and a phase barrier is simply
//! "join every handle in the set". Workers never abort a phase: a panic
//! joins as a failed fetch.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

/// Outcome of one object transfer. `local_path = None` signals a
/// per-object failure (mismatch, I/O, or skip); these are non-fatal.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub bucket: String,
    pub local_path: Option<PathBuf>,
}

impl FetchResult {
    pub fn failed(bucket: impl Into<String>) -> Self {
        FetchResult {
            bucket: bucket.into(),
            local_path: None,
        }
    }
}

/// Handle to one in-flight transfer
pub struct FetchHandle {
    bucket: String,
    task: JoinHandle<FetchResult>,
}

/// Fixed-size pool of transfer workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        WorkerPool {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Submit a transfer; it runs as soon as a permit frees up
    pub fn submit<F>(&self, bucket: impl Into<String>, task: F) -> FetchHandle
    where
        F: Future<Output = FetchResult> + Send + 'static,
    {
        let bucket = bucket.into();
        let permits = Arc::clone(&self.permits);
        FetchHandle {
            bucket,
            task: tokio::spawn(async move {
                // The semaphore is never closed for the pool's lifetime.
                let _permit = permits
                    .acquire_owned()
                    .await
                    .expect("worker pool semaphore closed");
                task.await
            }),
        }
    }
}

/// The handles of one dispatch batch; joining it is the phase barrier
#[derive(Default)]
pub struct DownloadSet {
    handles: Vec<FetchHandle>,
}

impl DownloadSet {
    pub fn new() -> Self {
        DownloadSet::default()
    }

    pub fn push(&mut self, handle: FetchHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every transfer in the set to terminate (success or skip)
    pub async fn join(self) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.task.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("Download worker for bucket {} died: {}", handle.bucket, e);
                    results.push(FetchResult::failed(handle.bucket));
                }
            }
        }
        results
    }
}

/// How many fetches in a joined batch produced a verified local file
pub fn succeeded(results: &[FetchResult]) -> usize {
    results.iter().filter(|r| r.local_path.is_some()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_returns_every_result() {
        let pool = WorkerPool::new(4);
        let mut set = DownloadSet::new();
        for i in 0..10 {
            set.push(pool.submit("b", async move {
                FetchResult {
                    bucket: "b".to_string(),
                    local_path: Some(PathBuf::from(format!("/x/{}", i))),
                }
            }));
        }
        let results = set.join().await;
        assert_eq!(results.len(), 10);
        assert_eq!(succeeded(&results), 10);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut set = DownloadSet::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            set.push(pool.submit("b", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                FetchResult::failed("b")
            }));
        }
        set.join().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicked_worker_joins_as_failure() {
        let pool = WorkerPool::new(2);
        let mut set = DownloadSet::new();
        set.push(pool.submit("chain-bucket", async { panic!("worker bug") }));
        set.push(pool.submit("chain-bucket", async {
            FetchResult {
                bucket: "chain-bucket".to_string(),
                local_path: Some(PathBuf::from("/ok")),
            }
        }));

        let results = set.join().await;
        assert_eq!(results.len(), 2);
        assert_eq!(succeeded(&results), 1);
        let failed = results.iter().find(|r| r.local_path.is_none()).unwrap();
        assert_eq!(failed.bucket, "chain-bucket");
    }

    #[tokio::test]
    async fn test_barrier_waits_for_slowest() {
        let pool = WorkerPool::new(4);
        let mut set = DownloadSet::new();
        let start = tokio::time::Instant::now();
        set.push(pool.submit("b", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            FetchResult::failed("b")
        }));
        set.push(pool.submit("b", async { FetchResult::failed("b") }));
        set.join().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
