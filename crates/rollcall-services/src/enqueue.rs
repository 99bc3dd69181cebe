//! Enqueue API used by the attendance subsystem and the sweeps

use rollcall_core::{
    models::{CallContext, EnqueueOptions, FollowUpJob, JobPayload, ParentContact},
    traits::JobQueue,
    AppError, AppResult,
};
use rollcall_telephony::validate_phone_number;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

pub struct CallEnqueuer {
    queue: Arc<dyn JobQueue>,
    defaults: EnqueueOptions,
}

impl CallEnqueuer {
    pub fn new(queue: Arc<dyn JobQueue>, defaults: EnqueueOptions) -> Self {
        Self { queue, defaults }
    }

    pub fn defaults(&self) -> EnqueueOptions {
        self.defaults
    }

    fn check_contact(contact: &ParentContact) -> AppResult<()> {
        contact.validate()?;
        if !validate_phone_number(&contact.phone) {
            return Err(AppError::InvalidPhoneNumber(contact.phone.clone()));
        }
        Ok(())
    }

    /// Queue the first call for one absence
    #[instrument(skip(self, contact, context, opts))]
    pub async fn enqueue_follow_up(
        &self,
        student_id: &str,
        absence_id: Option<&str>,
        contact: ParentContact,
        context: CallContext,
        opts: Option<EnqueueOptions>,
    ) -> AppResult<String> {
        Self::check_contact(&contact)?;

        let job = FollowUpJob {
            student_id: student_id.to_string(),
            absence_id: absence_id.map(str::to_string),
            contact,
            context,
        };
        let job_id = self
            .queue
            .enqueue(JobPayload::AbsenceFollowup(job), opts.unwrap_or(self.defaults))
            .await?;

        info!("Enqueued follow-up job {} for absence {:?}", job_id, absence_id);
        Ok(job_id)
    }

    /// Queue another attempt of an unanswered call
    #[instrument(skip(self))]
    pub async fn enqueue_retry(&self, call_id: Uuid, delay: Duration) -> AppResult<String> {
        let job_id = self
            .queue
            .enqueue(
                JobPayload::RetryCall { call_id },
                self.defaults.with_delay(delay),
            )
            .await?;

        info!("Enqueued retry job {} for call {} (delay {:?})", job_id, call_id, delay);
        Ok(job_id)
    }

    /// Queue many follow-ups at once. All are validated before any is queued.
    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    pub async fn enqueue_bulk(&self, jobs: Vec<FollowUpJob>) -> AppResult<Vec<String>> {
        for job in &jobs {
            Self::check_contact(&job.contact).map_err(|e| {
                AppError::Validation(format!("job for student {}: {}", job.student_id, e))
            })?;
        }

        let batch = jobs
            .into_iter()
            .map(|job| (JobPayload::AbsenceFollowup(job), self.defaults))
            .collect();
        let ids = self.queue.enqueue_bulk(batch).await?;

        info!("Enqueued {} follow-up jobs", ids.len());
        Ok(ids)
    }
}
