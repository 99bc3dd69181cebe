//! Call record queries and manual call logging

use chrono::{DateTime, Duration, Utc};
use rollcall_core::{
    models::{AbsenceReason, CallProvider, CallRecord, CallResult, CallStats, LanguageInfo},
    state_machine::apply_result,
    traits::{AttendanceGateway, CallRecordStore},
    AppError, AppResult,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Metadata key for free-text notes on a manual call
pub const NOTES_KEY: &str = "notes";

/// A call a teacher made by hand
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ManualCallRequest {
    #[validate(length(min = 1, max = 64))]
    pub student_id: String,

    pub absence_id: Option<String>,

    #[validate(length(min = 9, max = 20))]
    pub phone: String,

    pub contact_name: Option<String>,

    /// Must be a terminal result
    pub result: CallResult,

    pub reason: Option<AbsenceReason>,

    #[validate(length(max = 1000))]
    pub details: Option<String>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,

    /// Talk time, for answered calls
    #[validate(range(min = 0, max = 86400))]
    pub duration_seconds: Option<i64>,

    /// Defaults to now
    pub called_at: Option<DateTime<Utc>>,
}

pub struct CallService {
    store: Arc<dyn CallRecordStore>,
    attendance: Arc<dyn AttendanceGateway>,
}

impl CallService {
    pub fn new(store: Arc<dyn CallRecordStore>, attendance: Arc<dyn AttendanceGateway>) -> Self {
        Self { store, attendance }
    }

    pub async fn get_call(&self, id: Uuid) -> AppResult<CallRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::CallRecordNotFound(id.to_string()))
    }

    pub async fn call_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<CallStats> {
        self.store.call_stats(from, to).await
    }

    /// Log a manual call as a finished attempt.
    ///
    /// The attempt number continues the absence's sequence. The absence is
    /// marked call-triggered so the end-of-day sweep leaves it alone, and an
    /// answered call with a reason resolves it.
    #[instrument(skip(self, request), fields(student_id = %request.student_id))]
    pub async fn record_manual_call(&self, request: ManualCallRequest) -> AppResult<CallRecord> {
        request.validate()?;
        if !request.result.is_terminal() {
            return Err(AppError::Validation(
                "a manual call must have a final result".to_string(),
            ));
        }

        let previous = match &request.absence_id {
            Some(absence_id) => {
                self.store
                    .find_for_absence(&request.student_id, absence_id)
                    .await?
            }
            None => Vec::new(),
        };
        let attempt = previous.iter().map(|r| r.attempt_number).max().unwrap_or(0) + 1;
        let max_attempts = previous
            .iter()
            .map(|r| r.max_attempts)
            .max()
            .unwrap_or(attempt)
            .max(attempt);

        let called_at = request.called_at.unwrap_or_else(Utc::now);
        let mut record = CallRecord::new_attempt(
            request.student_id.clone(),
            request.absence_id.clone(),
            request.phone.clone(),
            attempt,
            max_attempts,
        );
        record.provider = CallProvider::Manual;
        record.contact_name = request.contact_name.clone();
        record.language = LanguageInfo::from_phone(&request.phone);
        record.time_placed = called_at;

        let talk = request.duration_seconds.filter(|_| request.result == CallResult::Answered);
        let ended = called_at + Duration::seconds(talk.unwrap_or(0));
        record.record_ended(ended, talk);
        apply_result(&mut record, request.result, called_at)?;

        record.response.reason = request.reason;
        record.response.reason_details = request.details.clone();
        if let Some(notes) = &request.notes {
            record.metadata.insert(NOTES_KEY.to_string(), notes.clone());
        }

        let saved = self.store.insert(&record).await?;
        info!(
            "Logged manual call {} for student {} (attempt {}, {})",
            saved.id, saved.student_id, saved.attempt_number, saved.result
        );

        if let Some(absence_id) = &request.absence_id {
            if let Err(e) = self.attendance.mark_call_triggered(absence_id).await {
                warn!("Could not mark absence {} triggered: {}", absence_id, e);
            }
            if let (CallResult::Answered, Some(reason)) = (request.result, request.reason) {
                self.attendance
                    .record_resolution(absence_id, reason, request.details.as_deref())
                    .await?;
            }
        }

        Ok(saved)
    }
}
