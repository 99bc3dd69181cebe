//! Job queue payloads and bookkeeping
//!
//! Jobs are ephemeral call intents. Processing one successfully produces
//! exactly one call record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::absence::{CallContext, ParentContact};
use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// First call for an absence
    AbsenceFollowup,
    /// Next attempt after an unanswered call
    RetryCall,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AbsenceFollowup => "absence-followup",
            JobKind::RetryCall => "retry-call",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// First-attempt call intent for one absence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpJob {
    pub student_id: String,
    pub absence_id: Option<String>,
    pub contact: ParentContact,
    #[serde(default)]
    pub context: CallContext,
}

/// What a queued job asks the worker to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    AbsenceFollowup(FollowUpJob),
    RetryCall {
        /// The unanswered attempt being retried
        call_id: Uuid,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::AbsenceFollowup(_) => JobKind::AbsenceFollowup,
            JobPayload::RetryCall { .. } => JobKind::RetryCall,
        }
    }
}

/// Per-job queue options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Lower runs first; ties are FIFO
    pub priority: u32,
    /// Hold the job back this many milliseconds
    pub delay_ms: u64,
    /// Worker-level attempts before the job is failed
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay_ms: 0,
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl EnqueueOptions {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Where a job currently sits in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// A job as stored by the queue backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub payload: JobPayload,
    pub opts: EnqueueOptions,
    /// Attempts already started, including the current one once reserved
    pub attempts_made: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn new(payload: JobPayload, opts: EnqueueOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            opts,
            attempts_made: 0,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Whether another worker-level attempt is allowed after the current one
    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.opts.max_attempts
    }

    /// Backoff before the next attempt, given `attempts_made` so far
    pub fn next_backoff(&self) -> Duration {
        self.opts.backoff.delay_for(self.attempts_made)
    }
}

/// Queue counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    pub paused: bool,
}

impl QueueStats {
    pub fn new(waiting: u64, active: u64, delayed: u64, completed: u64, failed: u64) -> Self {
        Self {
            waiting,
            active,
            delayed,
            completed,
            failed,
            total: waiting + active + delayed + completed + failed,
            paused: false,
        }
    }
}
