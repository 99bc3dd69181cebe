//! Unified error handling for Rollcall
//!
//! Every component error converts into [`AppError`], which knows its HTTP
//! status and a stable error code for API responses. Provider-facing webhook
//! handlers never surface these: they always answer with a valid IVR body.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::state_machine::TransitionError;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Storage Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Version conflict on call record {0}")]
    VersionConflict(String),

    // ==================== Queue Errors ====================
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Queue connection failed: {0}")]
    QueueConnection(String),

    // ==================== Provider Errors ====================
    #[error("Telephony provider error: {0}")]
    Telephony(String),

    #[error("Speech provider error: {0}")]
    Speech(String),

    #[error("Provider timed out: {0}")]
    Timeout(String),

    // ==================== Call Lifecycle Errors ====================
    #[error("Invalid call state transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("Call record not found: {0}")]
    CallRecordNotFound(String),

    #[error("Maximum attempts reached for call {0}")]
    MaxAttemptsReached(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("No callable contact for student {0}")]
    NoContact(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_)
            | AppError::InvalidInput(_)
            | AppError::InvalidPhoneNumber(_)
            | AppError::NoContact(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::CallRecordNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Conflict(_)
            | AppError::VersionConflict(_)
            | AppError::InvalidTransition(_)
            | AppError::MaxAttemptsReached(_) => StatusCode::CONFLICT,

            // 502 / 504 upstream failures
            AppError::Telephony(_) | AppError::Speech(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,

            // 503 Service Unavailable
            AppError::QueueConnection(_) | AppError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::VersionConflict(_) => "version_conflict",
            AppError::Queue(_) => "queue_error",
            AppError::QueueConnection(_) => "queue_connection_error",
            AppError::Telephony(_) => "telephony_error",
            AppError::Speech(_) => "speech_error",
            AppError::Timeout(_) => "timeout",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::CallRecordNotFound(_) => "call_record_not_found",
            AppError::MaxAttemptsReached(_) => "max_attempts_reached",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::InvalidPhoneNumber(_) => "invalid_phone_number",
            AppError::NoContact(_) => "no_contact",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether retrying the same operation later may succeed.
    ///
    /// Drives the worker pool: transient failures go back on the queue with
    /// backoff, everything else fails the job immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Pool(_)
                | AppError::VersionConflict(_)
                | AppError::Queue(_)
                | AppError::QueueConnection(_)
                | AppError::Telephony(_)
                | AppError::Speech(_)
                | AppError::Timeout(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CallResult;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::InvalidPhoneNumber("123".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::CallRecordNotFound("abc".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Timeout("telephony".to_string()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_transition_error_converts() {
        let err: AppError = TransitionError::AlreadyTerminal {
            current: CallResult::Busy,
            proposed: CallResult::Answered,
        }
        .into();

        assert_eq!(err.error_code(), "invalid_transition");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Telephony("503".to_string()).is_transient());
        assert!(AppError::Timeout("speech".to_string()).is_transient());
        assert!(!AppError::InvalidPhoneNumber("12".to_string()).is_transient());
        assert!(!AppError::NoContact("s1".to_string()).is_transient());
    }
}
