//! Follow-up policy shared by the orchestrator's services

use rollcall_core::{
    backoff::DEFAULT_CALL_RETRY_SECS,
    config::AppConfig,
    models::EnqueueOptions,
    BackoffPolicy,
};
use std::time::Duration;

use crate::dispatcher::DEFAULT_SESSION_GRACE;

/// Floor for how long a worker's claim on dialing a record holds
pub const DEFAULT_DIAL_LEASE: Duration = Duration::from_secs(120);

/// Knobs for placing and retrying follow-up calls
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpPolicy {
    /// Call attempts per absence, first call included
    pub max_attempts: u32,
    /// Options for new jobs: worker-level attempts and backoff
    pub job_options: EnqueueOptions,
    /// Delay between an unanswered call and its retry
    pub retry_policy: BackoffPolicy,
    /// Pause between successive enqueues of one sweep
    pub inter_call_delay: Duration,
    /// Used to turn local numbers into E.164
    pub country_code: String,
    /// Base of the webhook URLs handed to the provider
    pub public_base_url: String,
    /// How long a webhook waits for an unknown session to appear
    pub session_grace: Duration,
    /// After this, a record a worker started dialing may be dialed by another job
    pub dial_lease: Duration,
}

impl Default for FollowUpPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            job_options: EnqueueOptions::default(),
            retry_policy: BackoffPolicy::fixed(Duration::from_secs(DEFAULT_CALL_RETRY_SECS)),
            inter_call_delay: Duration::from_secs(2),
            country_code: "233".to_string(),
            public_base_url: "http://localhost:9000".to_string(),
            session_grace: DEFAULT_SESSION_GRACE,
            dial_lease: DEFAULT_DIAL_LEASE,
        }
    }
}

impl FollowUpPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.followup.max_attempts.max(1),
            job_options: EnqueueOptions {
                backoff: config.queue.backoff(),
                ..EnqueueOptions::default()
            }
            .with_max_attempts(config.queue.max_attempts),
            retry_policy: config.followup.retry_policy(),
            inter_call_delay: config.followup.inter_call_delay(),
            country_code: config.telephony.default_country_code.clone(),
            public_base_url: config.server.public_base_url.clone(),
            session_grace: DEFAULT_SESSION_GRACE,
            dial_lease: config
                .telephony
                .timeout()
                .saturating_mul(4)
                .max(DEFAULT_DIAL_LEASE),
        }
    }

    /// Policy without pauses, for tests
    pub fn without_delays(mut self) -> Self {
        self.inter_call_delay = Duration::ZERO;
        self.session_grace = Duration::ZERO;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let policy = FollowUpPolicy::from_config(&AppConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.job_options.max_attempts, 3);
        assert_eq!(policy.job_options.backoff.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.job_options.backoff.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.retry_policy.delay_for(2), Duration::from_secs(6 * 3600));
        assert_eq!(policy.inter_call_delay, Duration::from_secs(2));
        assert!(policy.dial_lease >= DEFAULT_DIAL_LEASE);
    }

    #[test]
    fn test_without_delays() {
        let policy = FollowUpPolicy::default().without_delays();
        assert!(policy.inter_call_delay.is_zero());
        assert!(policy.session_grace.is_zero());
    }
}
