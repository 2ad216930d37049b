//! Bounded background executor.
//!
//! Created once at process start and shared via `Arc`. `spawn` never
//! blocks the caller; at most `workers` jobs run at a time and the rest
//! wait for a permit. Job failures are logged and counted, never returned.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::metrics::METRICS;

pub struct WorkerPool {
    workers: usize,
    sem: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            sem: Arc::new(Semaphore::new(workers)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs spawned and not yet reaped by `drain`.
    pub fn pending(&self) -> usize {
        self.lock_tasks().len()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        // a poisoned set is still structurally valid
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `job`; its error, if any, is logged under `label`.
    pub fn spawn<F, E>(&self, label: impl Into<String>, job: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let label = label.into();
        let sem = Arc::clone(&self.sem);
        let mut tasks = self.lock_tasks();
        // reap finished jobs so the set does not grow without bound
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            match job.await {
                Ok(()) => debug!(job = %label, "background job finished"),
                Err(e) => {
                    METRICS.inc_background_upload_failures();
                    warn!(job = %label, error = %e, "background job failed");
                }
            }
        });
    }

    /// Wait for every job spawned so far.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.lock_tasks());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "background job panicked");
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn drain_waits_for_all_jobs() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let done = Arc::clone(&done);
            pool.spawn(format!("job-{i}"), async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            });
        }
        pool.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.spawn("sleeper", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), String>(())
            });
        }
        pool.drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failures_do_not_propagate() {
        let pool = WorkerPool::new(1);
        pool.spawn("boom", async { Err::<(), _>("upload refused") });
        pool.drain().await;
    }
}
