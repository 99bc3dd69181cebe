//! Ports between the orchestrator and its backing systems
//!
//! Each trait has a production implementation (PostgreSQL, Redis) and an
//! in-memory one used by tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    AbsenceReason, CallRecord, CallStats, EligibleAbsence, EnqueueOptions, FollowUpStats,
    JobPayload, QueueStats, QueuedJob,
};

/// Durable store of call attempts
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    /// Persist a new record. Fails with `Conflict` if the id exists.
    async fn insert(&self, record: &CallRecord) -> Result<CallRecord, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<CallRecord>, AppError>;

    /// Look up the record a provider webhook refers to
    async fn find_by_session(&self, session_id: &str) -> Result<Option<CallRecord>, AppError>;

    /// Every attempt for a student's absence, oldest attempt first
    async fn find_for_absence(
        &self,
        student_id: &str,
        absence_id: &str,
    ) -> Result<Vec<CallRecord>, AppError>;

    /// Write back a modified record.
    ///
    /// `record.version` must match the stored version, otherwise
    /// `AppError::VersionConflict` is returned and nothing is written. The
    /// returned record carries the bumped version.
    async fn save(&self, record: &CallRecord) -> Result<CallRecord, AppError>;

    /// Retryable outcomes with attempts left and no retry scheduled. Only
    /// the newest attempt of an absence qualifies, and none once any of its
    /// calls was answered.
    async fn find_retry_candidates(&self, limit: i64) -> Result<Vec<CallRecord>, AppError>;

    /// Scheduled retries that are due and not yet handed to the queue
    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CallRecord>, AppError>;

    /// Per-result counts for calls placed in `[from, to)`
    async fn call_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<CallStats, AppError>;
}

/// The attendance subsystem, seen from the orchestrator
#[async_trait]
pub trait AttendanceGateway: Send + Sync {
    /// Absent, follow-up required, not completed and not yet call-triggered
    async fn find_eligible_absences(&self, date: NaiveDate)
        -> Result<Vec<EligibleAbsence>, AppError>;

    async fn mark_call_triggered(&self, absence_id: &str) -> Result<(), AppError>;

    /// Write the discovered reason and complete the follow-up
    async fn record_resolution(
        &self,
        absence_id: &str,
        reason: AbsenceReason,
        details: Option<&str>,
    ) -> Result<(), AppError>;

    async fn follow_up_stats(&self, date: NaiveDate) -> Result<FollowUpStats, AppError>;
}

/// Durable, retryable queue of call intents (at-least-once delivery)
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, payload: JobPayload, opts: EnqueueOptions) -> Result<String, AppError>;

    async fn enqueue_bulk(
        &self,
        jobs: Vec<(JobPayload, EnqueueOptions)>,
    ) -> Result<Vec<String>, AppError>;

    /// Take the next due job and mark it active. `None` when nothing is due
    /// or the queue is paused.
    async fn reserve(&self) -> Result<Option<QueuedJob>, AppError>;

    async fn complete(&self, job: &QueuedJob) -> Result<(), AppError>;

    /// Put an active job back, due after `delay`
    async fn retry_later(
        &self,
        job: &QueuedJob,
        delay: Duration,
        error: &str,
    ) -> Result<(), AppError>;

    async fn fail(&self, job: &QueuedJob, error: &str) -> Result<(), AppError>;

    async fn stats(&self) -> Result<QueueStats, AppError>;

    /// Return jobs left active by a dead process to waiting. Returns the count.
    async fn recover_stalled(&self) -> Result<u64, AppError>;

    /// Drop every waiting and delayed job. Returns the count.
    async fn drain(&self) -> Result<u64, AppError>;

    async fn set_paused(&self, paused: bool) -> Result<(), AppError>;

    async fn is_paused(&self) -> Result<bool, AppError>;
}
