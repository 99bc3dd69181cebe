//! Call record model
//!
//! One outbound call attempt, from placement to its terminal result.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::absence::{AbsenceReason, CallContext, DtmfMeaning};
use super::language::LanguageInfo;

/// Outcome of a call attempt. `Pending` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallResult {
    #[default]
    Pending,
    Answered,
    NoAnswer,
    Busy,
    Failed,
    Rejected,
    Voicemail,
}

impl CallResult {
    pub const ALL: [CallResult; 7] = [
        CallResult::Pending,
        CallResult::Answered,
        CallResult::NoAnswer,
        CallResult::Busy,
        CallResult::Failed,
        CallResult::Rejected,
        CallResult::Voicemail,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallResult::Pending)
    }

    /// Outcomes the retry sweep may call back on
    #[inline]
    pub fn is_retryable_outcome(&self) -> bool {
        matches!(
            self,
            CallResult::NoAnswer | CallResult::Busy | CallResult::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallResult::Pending => "pending",
            CallResult::Answered => "answered",
            CallResult::NoAnswer => "no_answer",
            CallResult::Busy => "busy",
            CallResult::Failed => "failed",
            CallResult::Rejected => "rejected",
            CallResult::Voicemail => "voicemail",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CallResult::Pending),
            "answered" => Some(CallResult::Answered),
            "no_answer" => Some(CallResult::NoAnswer),
            "busy" => Some(CallResult::Busy),
            "failed" => Some(CallResult::Failed),
            "rejected" => Some(CallResult::Rejected),
            "voicemail" => Some(CallResult::Voicemail),
            _ => None,
        }
    }

    /// Map the telephony provider's status vocabulary.
    ///
    /// Unrecognised statuses yield `None` so the caller can log and ignore
    /// them instead of guessing.
    pub fn from_provider_status(status: &str) -> Option<Self> {
        let normalized: String = status
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match normalized.as_str() {
            "completed" | "success" | "answered" => Some(CallResult::Answered),
            "notanswered" | "noanswer" | "unanswered" => Some(CallResult::NoAnswer),
            "busy" => Some(CallResult::Busy),
            "failed" | "invalidphonenumber" | "insufficientcredit" => Some(CallResult::Failed),
            "rejected" | "callrejected" => Some(CallResult::Rejected),
            "voicemail" | "answeringmachine" => Some(CallResult::Voicemail),
            _ => None,
        }
    }
}

impl fmt::Display for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who placed the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallProvider {
    #[default]
    AfricasTalking,
    /// Placed by hand by a teacher and logged afterwards
    Manual,
}

impl CallProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallProvider::AfricasTalking => "africastalking",
            CallProvider::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "africastalking" => Some(CallProvider::AfricasTalking),
            "manual" => Some(CallProvider::Manual),
            _ => None,
        }
    }
}

/// What the parent told us, by keypad or speech
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    pub dtmf_input: Option<String>,
    pub dtmf_meaning: Option<DtmfMeaning>,
    pub transcript: Option<String>,
    pub reason: Option<AbsenceReason>,
    pub reason_details: Option<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub needs_follow_up: bool,
    /// Acknowledgment spoken back to the parent
    pub ai_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub url: String,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCost {
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallError {
    pub code: String,
    pub message: String,
}

/// Call-outcome retry bookkeeping.
///
/// A retry is scheduled exactly when `retry_at` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub retry_at: Option<DateTime<Utc>>,
    /// Queue job that will place the retry, once enqueued
    pub retry_job_id: Option<String>,
    /// Record created by the retry attempt
    pub retry_call_id: Option<Uuid>,
}

impl RetryState {
    #[inline]
    pub fn retry_scheduled(&self) -> bool {
        self.retry_at.is_some()
    }
}

/// Claim a worker takes on a pending record before asking the provider to
/// dial it. Only the holder, or anyone once it has expired, may dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialLease {
    pub job_id: String,
    pub leased_at: DateTime<Utc>,
}

impl DialLease {
    pub fn new(job_id: impl Into<String>, leased_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            leased_at,
        }
    }

    /// Whether `job_id` may dial at `now` under this lease
    pub fn admits(&self, job_id: &str, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.job_id == job_id || now - self.leased_at >= ttl
    }
}

/// One outbound call attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub student_id: String,
    pub absence_id: Option<String>,
    pub phone: String,
    pub contact_name: Option<String>,
    pub context: CallContext,

    pub provider: CallProvider,
    /// Opaque id the provider uses in every webhook for this call
    pub provider_session_id: Option<String>,
    /// Set while a worker is placing the call
    pub dial_lease: Option<DialLease>,

    /// 1-based, increases by one per retry of the same absence
    pub attempt_number: u32,
    pub max_attempts: u32,

    pub result: CallResult,

    pub time_placed: DateTime<Utc>,
    pub time_answered: Option<DateTime<Utc>>,
    pub time_ended: Option<DateTime<Utc>>,

    pub language: LanguageInfo,
    pub response: CallResponse,
    pub recording: Option<Recording>,
    pub retry: RetryState,
    pub cost: Option<CallCost>,
    pub error: Option<CallError>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Optimistic concurrency counter, bumped on every save
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// A fresh pending attempt, created before the provider is asked to dial
    pub fn new_attempt(
        student_id: impl Into<String>,
        absence_id: Option<String>,
        phone: impl Into<String>,
        attempt_number: u32,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        let phone = phone.into();
        Self {
            id: Uuid::new_v4(),
            student_id: student_id.into(),
            absence_id,
            language: LanguageInfo::from_phone(&phone),
            phone,
            contact_name: None,
            context: CallContext::default(),
            provider: CallProvider::AfricasTalking,
            provider_session_id: None,
            dial_lease: None,
            attempt_number: attempt_number.max(1),
            max_attempts: max_attempts.max(1),
            result: CallResult::Pending,
            time_placed: now,
            time_answered: None,
            time_ended: None,
            response: CallResponse::default(),
            recording: None,
            retry: RetryState::default(),
            cost: None,
            error: None,
            metadata: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seconds between answer and hang-up, when both are known
    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.time_answered, self.time_ended) {
            (Some(answered), Some(ended)) => Some((ended - answered).num_seconds().max(0)),
            _ => None,
        }
    }

    #[inline]
    pub fn is_successful(&self) -> bool {
        self.result == CallResult::Answered
    }

    /// Non-answered terminal result, attempts left and no retry scheduled yet
    pub fn is_retry_eligible(&self) -> bool {
        self.result.is_retryable_outcome()
            && self.attempt_number < self.max_attempts
            && !self.retry.retry_scheduled()
    }

    /// A later attempt for the same absence: a higher attempt number, or the
    /// same number created afterwards
    pub fn supersedes(&self, earlier: &CallRecord) -> bool {
        self.id != earlier.id
            && self.absence_id.is_some()
            && self.student_id == earlier.student_id
            && self.absence_id == earlier.absence_id
            && (self.attempt_number > earlier.attempt_number
                || (self.attempt_number == earlier.attempt_number
                    && self.created_at > earlier.created_at))
    }

    /// When the attempt ended, for retry timing
    pub fn terminal_at(&self) -> DateTime<Utc> {
        self.time_ended.unwrap_or(self.updated_at)
    }

    /// Record the provider-reported talk time, anchored on the hang-up time
    pub fn record_ended(&mut self, ended_at: DateTime<Utc>, talk_seconds: Option<i64>) {
        if self.time_ended.is_none() {
            self.time_ended = Some(ended_at);
        }
        if let (None, Some(secs)) = (self.time_answered, talk_seconds) {
            if secs > 0 {
                let ended = self.time_ended.unwrap_or(ended_at);
                self.time_answered = Some(ended - Duration::seconds(secs));
            }
        }
    }

    pub fn set_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.error = Some(CallError {
            code: code.into(),
            message: message.into(),
        });
    }
}

/// Per-result call counters over a period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    pub total: i64,
    pub by_result: BTreeMap<String, i64>,
    /// Answered calls as a whole percentage of all calls
    pub success_rate: i64,
}

impl CallStats {
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (CallResult, i64)>,
    {
        let mut by_result: BTreeMap<String, i64> = CallResult::ALL
            .iter()
            .map(|r| (r.as_str().to_string(), 0))
            .collect();

        let mut total = 0;
        for (result, count) in counts {
            *by_result.entry(result.as_str().to_string()).or_insert(0) += count;
            total += count;
        }

        let answered = by_result
            .get(CallResult::Answered.as_str())
            .copied()
            .unwrap_or(0);
        let success_rate = if total > 0 {
            ((answered as f64 / total as f64) * 100.0).round() as i64
        } else {
            0
        };

        Self {
            total,
            by_result,
            success_rate,
        }
    }
}
