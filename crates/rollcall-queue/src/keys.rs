//! Redis key layout for the call queue
//!
//! All keys share a configurable prefix (default `rollcall:calls`):
//!
//! - `{prefix}:job:{id}` - JSON body of a live job
//! - `{prefix}:waiting` - sorted set, score = priority band + ready time
//! - `{prefix}:delayed` - sorted set, score = due time (ms)
//! - `{prefix}:active` - sorted set, score = reservation time (ms)
//! - `{prefix}:completed` / `{prefix}:failed` - capped lists of finished jobs
//! - `{prefix}:paused` - present while processing is paused
//!
//! # Example
//!
//! ```
//! use rollcall_queue::keys::QueueKeys;
//!
//! let keys = QueueKeys::new("rollcall:calls");
//! assert_eq!(keys.job("42"), "rollcall:calls:job:42");
//! assert_eq!(keys.waiting(), "rollcall:calls:waiting");
//! ```

/// Width of one priority band in the waiting set. Larger than any
/// millisecond timestamp, so priority always dominates ready time.
pub const PRIORITY_SPAN: f64 = 1e13;

/// Priorities above this share the last band
pub const MAX_PRIORITY: u32 = 100;

/// Waiting-set score: lower priority value first, then earlier ready time
pub fn waiting_score(priority: u32, ready_ms: i64) -> f64 {
    f64::from(priority.min(MAX_PRIORITY)) * PRIORITY_SPAN + ready_ms as f64
}

#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Prefix of every job body key, for scripts that append the id
    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    pub fn waiting(&self) -> String {
        format!("{}:waiting", self.prefix)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    pub fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    pub fn completed(&self) -> String {
        format!("{}:completed", self.prefix)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    pub fn paused(&self) -> String {
        format!("{}:paused", self.prefix)
    }
}
