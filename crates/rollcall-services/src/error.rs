//! Job processing errors

use rollcall_core::AppError;
use rollcall_telephony::TelephonyError;
use thiserror::Error;

/// Why a job attempt failed. The kind decides whether the queue retries.
#[derive(Debug, Error)]
pub enum JobError {
    /// Worth another attempt after backoff (provider down, timeout)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help (bad number, missing record)
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

impl From<AppError> for JobError {
    fn from(err: AppError) -> Self {
        if err.is_transient() {
            JobError::Transient(err.to_string())
        } else {
            JobError::Permanent(err.to_string())
        }
    }
}

impl From<TelephonyError> for JobError {
    fn from(err: TelephonyError) -> Self {
        if err.is_transient() {
            JobError::Transient(err.to_string())
        } else {
            JobError::Permanent(err.to_string())
        }
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Transient(msg) => AppError::Queue(msg),
            JobError::Permanent(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_follows_source_error() {
        assert!(JobError::from(AppError::Database("down".into())).is_transient());
        assert!(!JobError::from(AppError::InvalidPhoneNumber("1".into())).is_transient());
        assert!(JobError::from(TelephonyError::Timeout(15_000)).is_transient());
        assert!(!JobError::from(TelephonyError::Rejected("InvalidPhoneNumber".into())).is_transient());
    }
}
