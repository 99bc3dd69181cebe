//! Bounded worker pool consuming the job queue
//!
//! At most `concurrency` jobs run at once, which caps simultaneous outbound
//! calls. Worker-level failures go back to the queue with the job's backoff;
//! call outcomes (no answer, busy) are left to the retry sweep.

use rollcall_core::{models::QueuedJob, traits::JobQueue, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::JobError;
use crate::processor::{JobProcessor, ProcessOutcome};

/// How a job attempt was settled with the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSettlement {
    Completed(ProcessOutcome),
    Retrying { delay: Duration },
    Failed { error: String },
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    processor: Arc<JobProcessor>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<JobProcessor>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Reserve and process jobs until `cancel` fires, then wait for the
    /// jobs already running.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let tracker = TaskTracker::new();
        info!("Worker pool started with {} workers", self.concurrency);

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = match self.queue.reserve().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!("Failed to reserve job: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                    }
                }
            };

            let pool = self.clone();
            tracker.spawn(async move {
                if let Err(e) = pool.handle(job).await {
                    error!("Failed to settle job with the queue: {}", e);
                }
                drop(permit);
            });
        }

        tracker.close();
        info!("Worker pool stopping, waiting for {} running jobs", tracker.len());
        tracker.wait().await;
        info!("Worker pool stopped");
    }

    /// Process one reserved job and settle it with the queue
    pub async fn handle(&self, job: QueuedJob) -> AppResult<JobSettlement> {
        match self.processor.process(&job).await {
            Ok(outcome) => {
                debug!("Job {} done: {:?}", job.id, outcome);
                self.queue.complete(&job).await?;
                Ok(JobSettlement::Completed(outcome))
            }
            Err(JobError::Transient(msg)) if job.has_attempts_left() => {
                let delay = job.next_backoff();
                warn!(
                    "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                    job.id, job.attempts_made, job.opts.max_attempts, delay, msg
                );
                self.queue.retry_later(&job, delay, &msg).await?;
                Ok(JobSettlement::Retrying { delay })
            }
            Err(e) => {
                let msg = e.to_string();
                error!(
                    "Job {} ({}) failed after {} attempt(s): {}",
                    job.id,
                    job.kind(),
                    job.attempts_made,
                    msg
                );
                self.queue.fail(&job, &msg).await?;
                Ok(JobSettlement::Failed { error: msg })
            }
        }
    }

    /// Process every job that is due right now, one at a time. Returns the
    /// settlements in processing order.
    pub async fn process_available(&self) -> AppResult<Vec<JobSettlement>> {
        let mut settled = Vec::new();
        while let Some(job) = self.queue.reserve().await? {
            settled.push(self.handle(job).await?);
        }
        Ok(settled)
    }
}
