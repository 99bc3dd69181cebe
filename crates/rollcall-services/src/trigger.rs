//! End-of-day follow-up sweep
//!
//! Scans the day's eligible absences and queues one call per absence. The
//! sweep never dials: every call goes through the queue so that worker
//! retries apply uniformly.

use chrono::NaiveDate;
use rollcall_core::{
    models::{select_primary_contact, EligibleAbsence},
    traits::{AttendanceGateway, CallRecordStore},
    AppError, AppResult,
};
use rollcall_telephony::validate_phone_number;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::enqueue::CallEnqueuer;
use crate::scheduler::SingleFlight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A call was already made for this absence, usually by hand
    CallExists,
    NoContact,
    InvalidPhone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    Enqueued { job_id: String },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepDetail {
    pub absence_id: String,
    pub student_id: String,
    #[serde(flatten)]
    pub outcome: SweepOutcome,
}

/// Result of one sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub date: NaiveDate,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<SweepDetail>,
}

impl SweepReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            details: Vec::new(),
        }
    }

    fn push(&mut self, absence: &EligibleAbsence, outcome: SweepOutcome) {
        self.total += 1;
        match outcome {
            SweepOutcome::Enqueued { .. } => self.successful += 1,
            SweepOutcome::Skipped { .. } => self.skipped += 1,
            SweepOutcome::Failed { .. } => self.failed += 1,
        }
        self.details.push(SweepDetail {
            absence_id: absence.absence_id.clone(),
            student_id: absence.student_id.clone(),
            outcome,
        });
    }
}

pub struct FollowUpTrigger {
    attendance: Arc<dyn AttendanceGateway>,
    store: Arc<dyn CallRecordStore>,
    enqueuer: Arc<CallEnqueuer>,
    inter_call_delay: Duration,
    in_flight: SingleFlight,
}

impl FollowUpTrigger {
    pub fn new(
        attendance: Arc<dyn AttendanceGateway>,
        store: Arc<dyn CallRecordStore>,
        enqueuer: Arc<CallEnqueuer>,
        inter_call_delay: Duration,
    ) -> Self {
        Self {
            attendance,
            store,
            enqueuer,
            inter_call_delay,
            in_flight: SingleFlight::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.is_running()
    }

    /// Queue calls for every eligible absence on `date`.
    ///
    /// Fails with `Conflict` while another sweep is running.
    #[instrument(skip(self))]
    pub async fn run_end_of_day_sweep(&self, date: NaiveDate) -> AppResult<SweepReport> {
        let _flight = self
            .in_flight
            .try_start()
            .ok_or_else(|| AppError::Conflict("follow-up sweep already running".to_string()))?;

        let absences = self.attendance.find_eligible_absences(date).await?;
        info!("Follow-up sweep for {}: {} eligible absences", date, absences.len());

        let mut report = SweepReport::new(date);
        let mut enqueued_any = false;

        for absence in &absences {
            let outcome = match self.sweep_one(absence, &mut enqueued_any).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Follow-up for absence {} failed: {}", absence.absence_id, e);
                    SweepOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            report.push(absence, outcome);
        }

        info!(
            "Follow-up sweep for {} done: {} queued, {} skipped, {} failed",
            date, report.successful, report.skipped, report.failed
        );
        Ok(report)
    }

    async fn sweep_one(
        &self,
        absence: &EligibleAbsence,
        enqueued_any: &mut bool,
    ) -> AppResult<SweepOutcome> {
        let existing = self
            .store
            .find_for_absence(&absence.student_id, &absence.absence_id)
            .await?;
        if !existing.is_empty() {
            info!(
                "Skipping absence {}: {} call(s) already recorded",
                absence.absence_id,
                existing.len()
            );
            self.attendance.mark_call_triggered(&absence.absence_id).await?;
            return Ok(SweepOutcome::Skipped {
                reason: SkipReason::CallExists,
            });
        }

        let Some(contact) = select_primary_contact(&absence.contacts) else {
            info!("Skipping absence {}: no callable contact", absence.absence_id);
            return Ok(SweepOutcome::Skipped {
                reason: SkipReason::NoContact,
            });
        };

        if !validate_phone_number(&contact.phone) {
            info!(
                "Skipping absence {}: invalid phone {}",
                absence.absence_id, contact.phone
            );
            return Ok(SweepOutcome::Skipped {
                reason: SkipReason::InvalidPhone,
            });
        }

        if *enqueued_any && !self.inter_call_delay.is_zero() {
            tokio::time::sleep(self.inter_call_delay).await;
        }

        let job_id = self
            .enqueuer
            .enqueue_follow_up(
                &absence.student_id,
                Some(&absence.absence_id),
                contact.clone(),
                absence.context.clone(),
                None,
            )
            .await?;
        *enqueued_any = true;

        if let Err(e) = self.attendance.mark_call_triggered(&absence.absence_id).await {
            // the job is queued; the worker's duplicate check covers a re-run
            warn!(
                "Queued job {} but could not mark absence {} triggered: {}",
                job_id, absence.absence_id, e
            );
        }

        Ok(SweepOutcome::Enqueued { job_id })
    }
}
