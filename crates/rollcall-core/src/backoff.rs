//! Retry backoff policy
//!
//! One policy object maps an attempt number to a delay. The worker pool
//! uses it for provider/API failures and the retry sweep uses it for call
//! outcomes (no answer, busy, failed), so delay math lives only here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base delay for worker-level retries (1 minute)
pub const DEFAULT_WORKER_BACKOFF_SECS: u64 = 60;

/// Default delay before re-calling after an unanswered attempt (6 hours)
pub const DEFAULT_CALL_RETRY_SECS: u64 = 6 * 60 * 60;

/// Shape of the delay curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay for every attempt
    Fixed,
    /// `base * 2^(attempt - 1)`
    #[default]
    Exponential,
}

/// Attempt → delay mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(rename = "type")]
    pub kind: BackoffKind,

    /// Delay for the first retry, in seconds
    pub base_secs: u64,

    /// Upper bound for any single delay, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_secs: Option<u64>,
}

impl BackoffPolicy {
    pub fn exponential(base: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_secs: base.as_secs(),
            max_secs: None,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_secs: delay.as_secs(),
            max_secs: None,
        }
    }

    /// Cap every computed delay at `max`
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max_secs = Some(max.as_secs());
        self
    }

    /// Delay to wait before retry number `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let secs = match self.kind {
            BackoffKind::Fixed => self.base_secs,
            BackoffKind::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                self.base_secs.saturating_mul(factor)
            }
        };

        let secs = match self.max_secs {
            Some(max) => secs.min(max),
            None => secs,
        };

        Duration::from_secs(secs)
    }
}

impl Default for BackoffPolicy {
    /// Worker-level default: exponential starting at 60s
    fn default() -> Self {
        Self::exponential(Duration::from_secs(DEFAULT_WORKER_BACKOFF_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_doubles() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
    }

    #[test]
    fn test_fixed_is_constant() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(DEFAULT_CALL_RETRY_SECS));
        assert_eq!(policy.delay_for(1), Duration::from_secs(21_600));
        assert_eq!(policy.delay_for(5), Duration::from_secs(21_600));
    }

    #[test]
    fn test_attempt_zero_and_overflow() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(10));
        assert_eq!(policy.delay_for(0), Duration::from_secs(10));
        // Huge attempt numbers saturate instead of panicking
        assert_eq!(policy.delay_for(200), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_max_cap() {
        let policy =
            BackoffPolicy::exponential(Duration::from_secs(60)).with_max(Duration::from_secs(90));
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(4), Duration::from_secs(90));
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(BackoffPolicy::default()).unwrap();
        assert_eq!(json["type"], "exponential");
        assert_eq!(json["base_secs"], 60);
    }
}
