//! Turns one queued job into one call attempt
//!
//! Delivery is at-least-once, so processing is idempotent on call record
//! creation: a redelivered job finds the record it created last time and
//! either re-dials it (no session yet) or completes without dialing.
//! Dialing itself is guarded by a lease on the record, so two jobs for the
//! same absence never ring the parent twice.

use chrono::Utc;
use rollcall_core::{
    models::{CallRecord, CallResult, DialLease, FollowUpJob, JobPayload, LanguageInfo, QueuedJob},
    state_machine::apply_result,
    traits::CallRecordStore,
    AppError,
};
use rollcall_telephony::{
    format_phone_number, validate_phone_number, CallRequest, TelephonyClient, TelephonyError,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::policy::FollowUpPolicy;
use crate::records::update_with_retry;

/// What a successfully processed job did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The provider accepted the call
    Placed { call_id: Uuid, session_id: String },
    /// A redelivery found the call already dialed
    AlreadyPlaced { call_id: Uuid },
    /// Nothing to dial
    Skipped { reason: String },
}

pub struct JobProcessor {
    store: Arc<dyn CallRecordStore>,
    telephony: Arc<dyn TelephonyClient>,
    policy: FollowUpPolicy,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn CallRecordStore>,
        telephony: Arc<dyn TelephonyClient>,
        policy: FollowUpPolicy,
    ) -> Self {
        Self {
            store,
            telephony,
            policy,
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind(), attempt = job.attempts_made))]
    pub async fn process(&self, job: &QueuedJob) -> Result<ProcessOutcome, JobError> {
        let attempt = match &job.payload {
            JobPayload::AbsenceFollowup(follow_up) => self.first_attempt(follow_up, job).await?,
            JobPayload::RetryCall { call_id } => self.next_attempt(*call_id, job).await?,
        };

        match attempt {
            Attempt::Dial(record) => self.place(record, job).await,
            Attempt::Claim(record) => {
                let call_id = record.id;
                match self.claim(record, job).await? {
                    Some(claimed) => self.place(claimed, job).await,
                    None => Ok(ProcessOutcome::AlreadyPlaced { call_id }),
                }
            }
            Attempt::Done(outcome) => Ok(outcome),
        }
    }

    async fn first_attempt(
        &self,
        follow_up: &FollowUpJob,
        job: &QueuedJob,
    ) -> Result<Attempt, JobError> {
        if !validate_phone_number(&follow_up.contact.phone) {
            return Err(JobError::Permanent(
                AppError::InvalidPhoneNumber(follow_up.contact.phone.clone()).to_string(),
            ));
        }

        if let Some(absence_id) = &follow_up.absence_id {
            let existing = self
                .store
                .find_for_absence(&follow_up.student_id, absence_id)
                .await?;
            if let Some(attempt) = Self::resume(&existing) {
                return Ok(attempt);
            }
            if !existing.is_empty() {
                info!("Absence {} already has a finished call, not dialing", absence_id);
                return Ok(Attempt::Done(ProcessOutcome::Skipped {
                    reason: format!("absence {} already called", absence_id),
                }));
            }
        }

        let mut record = CallRecord::new_attempt(
            follow_up.student_id.clone(),
            follow_up.absence_id.clone(),
            format_phone_number(&follow_up.contact.phone, &self.policy.country_code),
            1,
            self.policy.max_attempts,
        );
        record.contact_name = Some(follow_up.contact.name.clone());
        record.context = follow_up.context.clone();
        record.language =
            LanguageInfo::for_contact(follow_up.contact.preferred_language, &follow_up.contact.phone);
        record.dial_lease = Some(DialLease::new(job.id.clone(), Utc::now()));

        self.insert_or_resume(record).await
    }

    async fn next_attempt(&self, call_id: Uuid, job: &QueuedJob) -> Result<Attempt, JobError> {
        let prior = self
            .store
            .get(call_id)
            .await?
            .ok_or_else(|| JobError::Permanent(AppError::CallRecordNotFound(call_id.to_string()).to_string()))?;

        if let Some(linked) = prior.retry.retry_call_id {
            if let Some(record) = self.store.get(linked).await? {
                debug!("Retry of {} already created attempt {}", call_id, linked);
                return Ok(Self::resume(std::slice::from_ref(&record)).unwrap_or(Attempt::Done(
                    ProcessOutcome::AlreadyPlaced { call_id: linked },
                )));
            }
        }

        let siblings = match &prior.absence_id {
            Some(absence_id) => {
                self.store
                    .find_for_absence(&prior.student_id, absence_id)
                    .await?
            }
            None => Vec::new(),
        };
        // the absence's pending call, if any, is the one to dial
        if let Some(attempt) = Self::resume(&siblings) {
            return Ok(attempt);
        }

        if prior.result == CallResult::Answered
            || siblings.iter().any(|r| r.result == CallResult::Answered)
        {
            return Ok(Attempt::Done(ProcessOutcome::Skipped {
                reason: format!("absence of call {} was already answered", call_id),
            }));
        }
        if let Some(later) = siblings.iter().find(|r| r.supersedes(&prior)) {
            info!(
                "Call {} superseded by attempt {} ({}), not retrying",
                call_id, later.attempt_number, later.id
            );
            return Ok(Attempt::Done(ProcessOutcome::Skipped {
                reason: format!("call {} superseded by call {}", call_id, later.id),
            }));
        }

        let attempt_number = siblings
            .iter()
            .map(|r| r.attempt_number)
            .chain(std::iter::once(prior.attempt_number))
            .max()
            .unwrap_or(prior.attempt_number)
            + 1;
        if attempt_number > prior.max_attempts {
            return Err(JobError::Permanent(
                AppError::MaxAttemptsReached(call_id.to_string()).to_string(),
            ));
        }

        let mut record = CallRecord::new_attempt(
            prior.student_id.clone(),
            prior.absence_id.clone(),
            prior.phone.clone(),
            attempt_number,
            prior.max_attempts,
        );
        record.contact_name = prior.contact_name.clone();
        record.context = prior.context.clone();
        record.language = prior.language;
        record.dial_lease = Some(DialLease::new(job.id.clone(), Utc::now()));

        let attempt = self.insert_or_resume(record).await?;
        if let Attempt::Dial(next) = &attempt {
            let next_id = next.id;
            update_with_retry(self.store.as_ref(), prior, |r| {
                let mut linked = r.clone();
                linked.retry.retry_call_id = Some(next_id);
                (linked, ())
            })
            .await?;
            info!(
                "Created attempt {} ({}) as retry of {}",
                next.attempt_number, next_id, call_id
            );
        }
        Ok(attempt)
    }

    /// A pending record among `records` is picked up again
    fn resume(records: &[CallRecord]) -> Option<Attempt> {
        let pending = records.iter().find(|r| r.result == CallResult::Pending)?;
        Some(match &pending.provider_session_id {
            Some(_) => Attempt::Done(ProcessOutcome::AlreadyPlaced {
                call_id: pending.id,
            }),
            None => Attempt::Claim(pending.clone()),
        })
    }

    /// Take the dial lease on a pending record. `None` when the call was
    /// placed meanwhile or another job holds a live lease.
    async fn claim(
        &self,
        record: CallRecord,
        job: &QueuedJob,
    ) -> Result<Option<CallRecord>, JobError> {
        let call_id = record.id;
        let ttl = chrono::Duration::from_std(self.policy.dial_lease)
            .map_err(|e| JobError::Permanent(format!("dial lease out of range: {}", e)))?;
        let now = Utc::now();

        let (saved, claimed) = update_with_retry(self.store.as_ref(), record, |r| {
            let free = r.result == CallResult::Pending
                && r.provider_session_id.is_none()
                && r.dial_lease
                    .as_ref()
                    .map_or(true, |lease| lease.admits(&job.id, now, ttl));
            if !free {
                return (r.clone(), false);
            }
            let mut updated = r.clone();
            updated.dial_lease = Some(DialLease::new(job.id.clone(), now));
            (updated, true)
        })
        .await?;

        if claimed {
            Ok(Some(saved))
        } else {
            debug!(
                "Call {} is being dialed by job {:?}, not dialing again",
                call_id,
                saved.dial_lease.as_ref().map(|l| l.job_id.as_str())
            );
            Ok(None)
        }
    }

    async fn insert_or_resume(&self, record: CallRecord) -> Result<Attempt, JobError> {
        match self.store.insert(&record).await {
            Ok(stored) => Ok(Attempt::Dial(stored)),
            Err(AppError::Conflict(msg)) => {
                // a concurrent delivery of the same intent won the insert
                debug!("Insert conflict ({}), looking for the pending attempt", msg);
                let existing = match &record.absence_id {
                    Some(absence_id) => {
                        self.store
                            .find_for_absence(&record.student_id, absence_id)
                            .await?
                    }
                    None => Vec::new(),
                };
                Self::resume(&existing).ok_or(JobError::Transient(msg))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn place(&self, record: CallRecord, job: &QueuedJob) -> Result<ProcessOutcome, JobError> {
        let call_id = record.id;
        let request = CallRequest::to(record.phone.clone());

        match self.telephony.place_call(&request).await {
            Ok(placed) => {
                let session_id = placed.session_id.clone();
                update_with_retry(self.store.as_ref(), record, |r| {
                    let mut updated = r.clone();
                    updated.provider_session_id = Some(placed.session_id.clone());
                    (updated, ())
                })
                .await?;
                info!("Placed call {} to {} (session {})", call_id, placed.phone, session_id);
                Ok(ProcessOutcome::Placed {
                    call_id,
                    session_id,
                })
            }
            Err(e) if e.is_transient() => {
                warn!("Placing call {} failed, may retry: {}", call_id, e);
                if !job.has_attempts_left() {
                    self.note_error(record, &e, false).await?;
                }
                Err(e.into())
            }
            Err(e) => {
                warn!("Placing call {} failed permanently: {}", call_id, e);
                self.note_error(record, &e, true).await?;
                Err(e.into())
            }
        }
    }

    /// Record a placement error. Only a permanent rejection ends the call as
    /// failed; an exhausted transient error leaves the result untouched.
    async fn note_error(
        &self,
        record: CallRecord,
        error: &TelephonyError,
        end_call: bool,
    ) -> Result<(), JobError> {
        let message = error.to_string();
        let now = Utc::now();
        update_with_retry(self.store.as_ref(), record, |r| {
            let mut updated = r.clone();
            updated.set_error("placement_failed", message.clone());
            if end_call && apply_result(&mut updated, CallResult::Failed, now).is_ok() {
                updated.record_ended(now, None);
            }
            (updated, ())
        })
        .await?;
        Ok(())
    }
}

enum Attempt {
    /// Freshly inserted with this job's lease
    Dial(CallRecord),
    /// Pending record found again; dial only after claiming it
    Claim(CallRecord),
    Done(ProcessOutcome),
}
