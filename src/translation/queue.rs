/*!
 * Bounded job pool.
 *
 * Jobs for different keys share a small number of worker slots. Each running
 * job is registered with a cancellation token so a superseding request can
 * stop it, whether it is still waiting for a slot or already translating.
 */

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::app_config::PipelineConfig;
use crate::errors::TranslationError;
use crate::progress::JobKey;

#[derive(Debug)]
struct RunningJob {
    run_id: String,
    cancel: CancellationToken,
    // @field: False while the run still waits for a worker slot
    has_slot: bool,
}

#[derive(Debug)]
struct QueueInner {
    slots: Semaphore,
    max_jobs: usize,
    job_timeout: Duration,
    running: Mutex<HashMap<JobKey, RunningJob>>,
}

/// Worker pool shared by all jobs; clones share the pool
#[derive(Debug, Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(max_jobs: usize, job_timeout: Duration) -> Self {
        let max_jobs = max_jobs.max(1);
        Self {
            inner: Arc::new(QueueInner {
                slots: Semaphore::new(max_jobs),
                max_jobs,
                job_timeout,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_concurrent_jobs, config.job_timeout())
    }

    /// Register a run for `key`, cancelling any earlier run of the same key
    pub fn register(&self, key: &JobKey, run_id: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        let previous = self.inner.running.lock().insert(
            key.clone(),
            RunningJob {
                run_id: run_id.to_string(),
                cancel: cancel.clone(),
                has_slot: false,
            },
        );
        if let Some(previous) = previous {
            if previous.run_id != run_id {
                debug!("Run {} of {} superseded", &previous.run_id[..previous.run_id.len().min(8)], key);
            }
            previous.cancel.cancel();
        }
        cancel
    }

    /// Cancel the registered run for `key`, if any
    pub fn cancel(&self, key: &JobKey) -> bool {
        match self.inner.running.lock().remove(key) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget `run_id` once it ended; a newer run of the same key is kept
    pub fn finish(&self, key: &JobKey, run_id: &str) {
        let mut running = self.inner.running.lock();
        if running.get(key).is_some_and(|job| job.run_id == run_id) {
            running.remove(key);
        }
    }

    pub fn is_running(&self, key: &JobKey) -> bool {
        self.inner.running.lock().contains_key(key)
    }

    /// Whether the run registered for `key` is still queued behind other jobs
    pub fn is_waiting(&self, key: &JobKey) -> bool {
        self.inner.running.lock().get(key).is_some_and(|job| !job.has_slot)
    }

    fn mark_slot_taken(&self, key: &JobKey, run_id: &str) {
        if let Some(job) = self.inner.running.lock().get_mut(key) {
            if job.run_id == run_id {
                job.has_slot = true;
            }
        }
    }

    pub fn registered_jobs(&self) -> usize {
        self.inner.running.lock().len()
    }

    pub fn available_slots(&self) -> usize {
        self.inner.slots.available_permits()
    }

    pub fn max_jobs(&self) -> usize {
        self.inner.max_jobs
    }

    /// Run `job` for run `run_id` of `key` in a worker slot under the job timeout.
    ///
    /// Waiting for the slot is cancellable. On timeout the token is cancelled
    /// so anything sharing it stops too.
    pub async fn execute<T, Fut>(
        &self,
        key: &JobKey,
        run_id: &str,
        cancel: &CancellationToken,
        job: Fut,
    ) -> Result<T, TranslationError>
    where
        Fut: Future<Output = Result<T, TranslationError>>,
    {
        let _slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TranslationError::Cancelled),
            slot = self.inner.slots.acquire() => slot.map_err(|_| TranslationError::Cancelled)?,
        };
        self.mark_slot_taken(key, run_id);
        debug!("Job {} got a worker slot", key);

        match tokio::time::timeout(self.inner.job_timeout, job).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Job exceeded its {:?} deadline", self.inner.job_timeout);
                cancel.cancel();
                Err(TranslationError::TimedOut(self.inner.job_timeout.as_secs()))
            }
        }
    }
}
