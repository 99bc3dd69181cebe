//! In-memory store and gateway
//!
//! Same contracts as the PostgreSQL implementations, including version
//! checks and the one-pending-call-per-absence rule. Used by tests and by
//! local runs without `database.url`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rollcall_core::{
    models::{
        AbsenceReason, AttendanceStatus, CallRecord, CallResult, CallStats, EligibleAbsence,
        FollowUpStats,
    },
    traits::{AttendanceGateway, CallRecordStore},
    AppError, AppResult,
};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Call records held in a map
#[derive(Default)]
pub struct InMemoryCallRecordStore {
    records: RwLock<HashMap<Uuid, CallRecord>>,
}

impl InMemoryCallRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, oldest first
    pub fn all(&self) -> Vec<CallRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.attempt_number));
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn same_absence(a: &CallRecord, b: &CallRecord) -> bool {
    a.absence_id.is_some() && a.student_id == b.student_id && a.absence_id == b.absence_id
}

#[async_trait]
impl CallRecordStore for InMemoryCallRecordStore {
    async fn insert(&self, record: &CallRecord) -> AppResult<CallRecord> {
        let mut records = self.records.write();

        if records.contains_key(&record.id) {
            return Err(AppError::Conflict(format!("call record {} exists", record.id)));
        }
        if let Some(session) = &record.provider_session_id {
            if records
                .values()
                .any(|r| r.provider_session_id.as_ref() == Some(session))
            {
                return Err(AppError::Conflict(format!("session {} already bound", session)));
            }
        }
        if record.result == CallResult::Pending
            && records
                .values()
                .any(|r| r.result == CallResult::Pending && same_absence(r, record))
        {
            return Err(AppError::Conflict(format!(
                "a pending call already exists for absence {:?}",
                record.absence_id
            )));
        }

        let now = Utc::now();
        let mut stored = record.clone();
        stored.version = 0;
        stored.created_at = now;
        stored.updated_at = now;
        records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<CallRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn find_by_session(&self, session_id: &str) -> AppResult<Option<CallRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|r| r.provider_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn find_for_absence(
        &self,
        student_id: &str,
        absence_id: &str,
    ) -> AppResult<Vec<CallRecord>> {
        let mut found: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.student_id == student_id && r.absence_id.as_deref() == Some(absence_id))
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.attempt_number, r.created_at));
        Ok(found)
    }

    async fn save(&self, record: &CallRecord) -> AppResult<CallRecord> {
        let mut records = self.records.write();

        let stored = records
            .get(&record.id)
            .ok_or_else(|| AppError::CallRecordNotFound(record.id.to_string()))?;

        if stored.version != record.version {
            debug!(
                "Version conflict on {}: have {}, stored {}",
                record.id, record.version, stored.version
            );
            return Err(AppError::VersionConflict(record.id.to_string()));
        }

        let mut updated = record.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        records.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn find_retry_candidates(&self, limit: i64) -> AppResult<Vec<CallRecord>> {
        let records = self.records.read();
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.is_retry_eligible())
            .filter(|r| {
                !records.values().any(|later| {
                    later.supersedes(r)
                        || (later.result == CallResult::Answered && same_absence(later, r))
                })
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| r.terminal_at());
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn find_due_retries(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<CallRecord>> {
        let mut found: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| {
                r.retry.retry_job_id.is_none()
                    && r.retry.retry_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| r.retry.retry_at);
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn call_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AppResult<CallStats> {
        let records = self.records.read();
        let counts = records
            .values()
            .filter(|r| from.map(|f| r.time_placed >= f).unwrap_or(true))
            .filter(|r| to.map(|t| r.time_placed < t).unwrap_or(true))
            .map(|r| (r.result, 1));
        Ok(CallStats::from_counts(counts))
    }
}

/// One attendance row as the in-memory gateway keeps it
#[derive(Debug, Clone)]
pub struct AbsenceEntry {
    pub absence: EligibleAbsence,
    pub status: AttendanceStatus,
    pub follow_up_required: bool,
    pub follow_up_completed: bool,
    pub call_triggered: bool,
    pub reason: Option<AbsenceReason>,
    pub reason_details: Option<String>,
}

impl AbsenceEntry {
    /// An absent mark that still needs a follow-up call
    pub fn needing_follow_up(absence: EligibleAbsence) -> Self {
        Self {
            absence,
            status: AttendanceStatus::Absent,
            follow_up_required: true,
            follow_up_completed: false,
            call_triggered: false,
            reason: None,
            reason_details: None,
        }
    }

    fn is_eligible_on(&self, date: NaiveDate) -> bool {
        self.absence.date == date
            && self.status == AttendanceStatus::Absent
            && self.follow_up_required
            && !self.follow_up_completed
            && !self.call_triggered
    }
}

/// Attendance rows held in insertion order
#[derive(Default)]
pub struct InMemoryAttendanceGateway {
    entries: RwLock<Vec<AbsenceEntry>>,
}

impl InMemoryAttendanceGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entry: AbsenceEntry) {
        self.entries.write().push(entry);
    }

    pub fn entry(&self, absence_id: &str) -> Option<AbsenceEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.absence.absence_id == absence_id)
            .cloned()
    }

    fn update<F>(&self, absence_id: &str, f: F) -> AppResult<()>
    where
        F: FnOnce(&mut AbsenceEntry),
    {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.absence.absence_id == absence_id)
            .ok_or_else(|| AppError::NotFound(format!("absence {}", absence_id)))?;
        f(entry);
        Ok(())
    }
}

#[async_trait]
impl AttendanceGateway for InMemoryAttendanceGateway {
    async fn find_eligible_absences(&self, date: NaiveDate) -> AppResult<Vec<EligibleAbsence>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.is_eligible_on(date))
            .map(|e| e.absence.clone())
            .collect())
    }

    async fn mark_call_triggered(&self, absence_id: &str) -> AppResult<()> {
        self.update(absence_id, |e| e.call_triggered = true)
    }

    async fn record_resolution(
        &self,
        absence_id: &str,
        reason: AbsenceReason,
        details: Option<&str>,
    ) -> AppResult<()> {
        self.update(absence_id, |e| {
            e.reason = Some(reason);
            if let Some(details) = details {
                e.reason_details = Some(details.to_string());
            }
            e.follow_up_completed = true;
        })
    }

    async fn follow_up_stats(&self, date: NaiveDate) -> AppResult<FollowUpStats> {
        let entries = self.entries.read();
        let absent: Vec<_> = entries
            .iter()
            .filter(|e| e.absence.date == date && e.status == AttendanceStatus::Absent)
            .collect();

        let count = |pred: &dyn Fn(&AbsenceEntry) -> bool| {
            absent.iter().filter(|e| pred(**e)).count() as i64
        };

        Ok(FollowUpStats {
            total_absences: absent.len() as i64,
            follow_up_required: count(&|e| e.follow_up_required),
            follow_up_completed: count(&|e| e.follow_up_completed),
            call_triggered: count(&|e| e.call_triggered),
            pending: count(&|e| e.is_eligible_on(date)),
        })
    }
}
