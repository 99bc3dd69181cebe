//! Call and enqueue DTOs

use rollcall_core::models::{CallContext, EnqueueOptions, FollowUpJob, ParentContact};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Request to queue the first call for an absence
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EnqueueCallRequest {
    #[validate(length(min = 1, max = 64))]
    pub student_id: String,

    pub absence_id: Option<String>,

    #[validate(nested)]
    pub contact: ParentContact,

    #[serde(default)]
    pub context: CallContext,

    /// Lower runs first
    pub priority: Option<u32>,

    /// Hold the job back this many milliseconds
    #[validate(range(max = 86_400_000))]
    pub delay_ms: Option<u64>,

    #[validate(range(min = 1, max = 10))]
    pub max_attempts: Option<u32>,
}

impl EnqueueCallRequest {
    /// Job options with the request's overrides on top of `defaults`
    pub fn options(&self, defaults: EnqueueOptions) -> EnqueueOptions {
        let mut opts = defaults;
        if let Some(priority) = self.priority {
            opts = opts.with_priority(priority);
        }
        if let Some(delay_ms) = self.delay_ms {
            opts = opts.with_delay(Duration::from_millis(delay_ms));
        }
        if let Some(max_attempts) = self.max_attempts {
            opts = opts.with_max_attempts(max_attempts);
        }
        opts
    }
}

/// Up to 500 follow-ups, validated as a whole before any is queued
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BulkEnqueueRequest {
    #[validate(length(min = 1, max = 500))]
    pub jobs: Vec<FollowUpJob>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkEnqueueResponse {
    pub count: usize,
    pub job_ids: Vec<String>,
}

/// Body of `POST /calls/{id}/retry`; may be omitted
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RetryCallRequest {
    #[validate(range(max = 86_400))]
    #[serde(default)]
    pub delay_secs: u64,
}

impl RetryCallRequest {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}
