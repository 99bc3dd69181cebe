//! The orchestrator service
//!
//! Built once at start-up from its ports and shared by reference with the
//! HTTP handlers, the worker pool and the scheduler. Tests build it over the
//! in-memory store and queue.

use chrono::{NaiveDate, Utc};
use rollcall_core::{
    config::{QueueConfig, SchedulerConfig},
    models::{CallResult, FollowUpStats, QueueStats},
    traits::{AttendanceGateway, CallRecordStore, JobQueue},
    AppError, AppResult,
};
use rollcall_speech::{SpeechPipeline, SpeechProvider};
use rollcall_telephony::TelephonyClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::calls::CallService;
use crate::dispatcher::WebhookDispatcher;
use crate::enqueue::CallEnqueuer;
use crate::policy::FollowUpPolicy;
use crate::processor::JobProcessor;
use crate::records::update_with_retry;
use crate::retry::RetrySweep;
use crate::scheduler::Scheduler;
use crate::trigger::FollowUpTrigger;
use crate::worker::WorkerPool;

/// Backing systems the orchestrator talks to
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn CallRecordStore>,
    pub attendance: Arc<dyn AttendanceGateway>,
    pub queue: Arc<dyn JobQueue>,
    pub telephony: Arc<dyn TelephonyClient>,
    pub speech: Arc<dyn SpeechProvider>,
}

pub struct Orchestrator {
    ports: Ports,
    policy: FollowUpPolicy,
    enqueuer: Arc<CallEnqueuer>,
    trigger: Arc<FollowUpTrigger>,
    processor: Arc<JobProcessor>,
    retry: Arc<RetrySweep>,
    dispatcher: Arc<WebhookDispatcher>,
    calls: Arc<CallService>,
}

impl Orchestrator {
    pub fn new(ports: Ports, policy: FollowUpPolicy) -> Self {
        let enqueuer = Arc::new(CallEnqueuer::new(ports.queue.clone(), policy.job_options));
        let trigger = Arc::new(FollowUpTrigger::new(
            ports.attendance.clone(),
            ports.store.clone(),
            enqueuer.clone(),
            policy.inter_call_delay,
        ));
        let processor = Arc::new(JobProcessor::new(
            ports.store.clone(),
            ports.telephony.clone(),
            policy.clone(),
        ));
        let retry = Arc::new(RetrySweep::new(
            ports.store.clone(),
            enqueuer.clone(),
            policy.retry_policy,
        ));
        let dispatcher = Arc::new(
            WebhookDispatcher::new(
                ports.store.clone(),
                ports.attendance.clone(),
                Arc::new(SpeechPipeline::new(ports.speech.clone())),
                policy.public_base_url.clone(),
            )
            .with_session_grace(policy.session_grace),
        );
        let calls = Arc::new(CallService::new(ports.store.clone(), ports.attendance.clone()));

        Self {
            ports,
            policy,
            enqueuer,
            trigger,
            processor,
            retry,
            dispatcher,
            calls,
        }
    }

    pub fn policy(&self) -> &FollowUpPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn CallRecordStore> {
        &self.ports.store
    }

    pub fn enqueuer(&self) -> &Arc<CallEnqueuer> {
        &self.enqueuer
    }

    pub fn trigger(&self) -> &Arc<FollowUpTrigger> {
        &self.trigger
    }

    pub fn retry_sweep(&self) -> &Arc<RetrySweep> {
        &self.retry
    }

    pub fn dispatcher(&self) -> &Arc<WebhookDispatcher> {
        &self.dispatcher
    }

    pub fn calls(&self) -> &Arc<CallService> {
        &self.calls
    }

    /// Worker pool sized by the queue configuration
    pub fn worker_pool(&self, config: &QueueConfig) -> Arc<WorkerPool> {
        self.worker_pool_with(config.concurrency, config.poll_interval())
    }

    pub fn worker_pool_with(&self, concurrency: usize, poll_interval: Duration) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            self.ports.queue.clone(),
            self.processor.clone(),
            concurrency,
            poll_interval,
        ))
    }

    pub fn scheduler(&self, config: &SchedulerConfig) -> AppResult<Arc<Scheduler>> {
        Ok(Arc::new(Scheduler::from_config(
            config,
            self.trigger.clone(),
            self.retry.clone(),
        )?))
    }

    /// Queue another attempt of a finished call outside the retry sweep.
    ///
    /// Only unanswered attempts with attempts left can be retried, and only
    /// once: the job id is recorded on the call so the sweep skips it.
    #[instrument(skip(self))]
    pub async fn retry_call(&self, call_id: Uuid, delay: Duration) -> AppResult<String> {
        let record = self.calls.get_call(call_id).await?;
        if !record.result.is_retryable_outcome() {
            return Err(AppError::Conflict(format!(
                "call {} is {} and cannot be retried",
                call_id, record.result
            )));
        }
        if record.attempt_number >= record.max_attempts {
            return Err(AppError::MaxAttemptsReached(call_id.to_string()));
        }
        if record.retry.retry_job_id.is_some() || record.retry.retry_call_id.is_some() {
            return Err(AppError::Conflict(format!(
                "a retry of call {} is already queued",
                call_id
            )));
        }
        if let Some(absence_id) = &record.absence_id {
            let siblings = self
                .ports
                .store
                .find_for_absence(&record.student_id, absence_id)
                .await?;
            if let Some(later) = siblings
                .iter()
                .find(|r| r.supersedes(&record) || r.result == CallResult::Answered)
            {
                return Err(AppError::Conflict(format!(
                    "absence {} already has call {} ({}, attempt {})",
                    absence_id, later.id, later.result, later.attempt_number
                )));
            }
        }

        let job_id = self.enqueuer.enqueue_retry(call_id, delay).await?;
        let retry_at = Utc::now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| AppError::Validation(format!("retry delay out of range: {}", e)))?;

        let saved = update_with_retry(self.ports.store.as_ref(), record, |r| {
            let mut updated = r.clone();
            if updated.retry.retry_job_id.is_none() {
                updated.retry.retry_job_id = Some(job_id.clone());
                updated.retry.retry_at.get_or_insert(retry_at);
            }
            (updated, ())
        })
        .await;
        if let Err(e) = saved {
            warn!("Enqueued retry job {} but could not record it on call {}: {}", job_id, call_id, e);
        }

        Ok(job_id)
    }

    pub async fn follow_up_stats(&self, date: NaiveDate) -> AppResult<FollowUpStats> {
        self.ports.attendance.follow_up_stats(date).await
    }

    pub async fn queue_stats(&self) -> AppResult<QueueStats> {
        self.ports.queue.stats().await
    }

    /// Stop workers from taking new jobs. Running jobs finish.
    #[instrument(skip(self))]
    pub async fn pause_queue(&self) -> AppResult<()> {
        self.ports.queue.set_paused(true).await?;
        info!("Job queue paused");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn resume_queue(&self) -> AppResult<()> {
        self.ports.queue.set_paused(false).await?;
        info!("Job queue resumed");
        Ok(())
    }

    /// Drop waiting and delayed jobs. Returns how many were dropped.
    #[instrument(skip(self))]
    pub async fn drain_queue(&self) -> AppResult<u64> {
        let dropped = self.ports.queue.drain().await?;
        info!("Job queue drained: {} jobs dropped", dropped);
        Ok(dropped)
    }

    /// Put jobs a crashed process left active back in line
    #[instrument(skip(self))]
    pub async fn recover_stalled_jobs(&self) -> AppResult<u64> {
        let recovered = self.ports.queue.recover_stalled().await?;
        if recovered > 0 {
            info!("Recovered {} stalled jobs", recovered);
        }
        Ok(recovered)
    }
}
