//! Call-outcome retry sweep
//!
//! Runs on an interval during the retry window. Each pass has two phases:
//! unanswered calls with attempts left get a `retry_at`, then every call
//! whose `retry_at` has passed gets a `retry-call` job.

use chrono::{DateTime, Utc};
use rollcall_core::{traits::CallRecordStore, AppError, AppResult, BackoffPolicy};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::enqueue::CallEnqueuer;
use crate::records::update_with_retry;
use crate::scheduler::SingleFlight;

/// Records examined per phase and pass
pub const DEFAULT_RETRY_BATCH: i64 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySweepReport {
    /// Calls that got a `retry_at` this pass
    pub scheduled: usize,
    /// Retry jobs handed to the queue
    pub enqueued: usize,
    pub failed: usize,
}

pub struct RetrySweep {
    store: Arc<dyn CallRecordStore>,
    enqueuer: Arc<CallEnqueuer>,
    retry_policy: BackoffPolicy,
    batch_size: i64,
    in_flight: SingleFlight,
}

impl RetrySweep {
    pub fn new(
        store: Arc<dyn CallRecordStore>,
        enqueuer: Arc<CallEnqueuer>,
        retry_policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            enqueuer,
            retry_policy,
            batch_size: DEFAULT_RETRY_BATCH,
            in_flight: SingleFlight::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One pass at `now`. Fails with `Conflict` while another pass runs.
    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> AppResult<RetrySweepReport> {
        let _flight = self
            .in_flight
            .try_start()
            .ok_or_else(|| AppError::Conflict("retry sweep already running".to_string()))?;

        let mut report = RetrySweepReport::default();
        self.schedule_candidates(&mut report).await?;
        self.enqueue_due(now, &mut report).await?;

        if report != RetrySweepReport::default() {
            info!(
                "Retry sweep: {} scheduled, {} enqueued, {} failed",
                report.scheduled, report.enqueued, report.failed
            );
        }
        Ok(report)
    }

    async fn schedule_candidates(&self, report: &mut RetrySweepReport) -> AppResult<()> {
        let candidates = self.store.find_retry_candidates(self.batch_size).await?;

        for record in candidates {
            let id = record.id;
            let delay = chrono::Duration::from_std(self.retry_policy.delay_for(record.attempt_number))
                .map_err(|e| AppError::Config(format!("retry delay out of range: {}", e)))?;

            let result = update_with_retry(self.store.as_ref(), record, |r| {
                let mut updated = r.clone();
                // re-checked: a concurrent pass may have scheduled it
                if updated.is_retry_eligible() {
                    updated.retry.retry_at = Some(updated.terminal_at() + delay);
                    (updated, true)
                } else {
                    (updated, false)
                }
            })
            .await;

            match result {
                Ok((saved, true)) => {
                    info!(
                        "Scheduled retry of call {} (attempt {}/{}) at {:?}",
                        id, saved.attempt_number, saved.max_attempts, saved.retry.retry_at
                    );
                    report.scheduled += 1;
                }
                Ok((_, false)) => {}
                Err(e) => {
                    error!("Failed to schedule retry of call {}: {}", id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn enqueue_due(&self, now: DateTime<Utc>, report: &mut RetrySweepReport) -> AppResult<()> {
        let due = self.store.find_due_retries(now, self.batch_size).await?;

        for record in due {
            let id = record.id;
            let job_id = match self.enqueuer.enqueue_retry(id, Duration::ZERO).await {
                Ok(job_id) => job_id,
                Err(e) => {
                    error!("Failed to enqueue retry of call {}: {}", id, e);
                    report.failed += 1;
                    continue;
                }
            };

            let saved = update_with_retry(self.store.as_ref(), record, |r| {
                let mut updated = r.clone();
                if updated.retry.retry_job_id.is_none() {
                    updated.retry.retry_job_id = Some(job_id.clone());
                }
                (updated, ())
            })
            .await;

            match saved {
                Ok(_) => report.enqueued += 1,
                Err(e) => {
                    // the job is queued; the processor's retry link stops a double dial
                    error!("Enqueued retry job {} but could not record it on call {}: {}", job_id, id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }
}
