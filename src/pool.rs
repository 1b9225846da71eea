//! Bounded pool for blocking quadrant jobs.
//!
//! Jobs are CPU-bound (warping, slicing), so each runs on tokio's blocking
//! thread pool while a semaphore caps how many run at once. `submit` returns
//! immediately with a handle; awaiting every handle of a zoom level is the
//! driver's barrier.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job cancelled before it started")]
    Cancelled,

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("worker pool is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool running at most `size` jobs at once (at least one).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs that could start right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Queue a blocking job.
    ///
    /// The job does not start if `cancel` fires while it waits for a permit.
    /// Once started it runs to completion.
    pub fn submit<F, T>(&self, cancel: CancellationToken, job: F) -> JoinHandle<Result<T, JobError>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(JobError::Cancelled),
                permit = semaphore.acquire_owned() => permit.map_err(|_| JobError::Closed)?,
            };
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            trace!("Job started");
            let result = tokio::task::spawn_blocking(job).await;
            drop(permit);
            result.map_err(|e| JobError::Panicked(e.to_string()))
        })
    }
}
