//! Rollcall Core Library
//!
//! Foundational types shared by every Rollcall crate. It includes:
//!
//! - Domain models (CallRecord, follow-up jobs, absences, languages)
//! - The call lifecycle state machine and its transition validation
//! - The backoff policy shared by the queue and the retry sweep
//! - Ports (traits) for the call record store, the attendance
//!   collaborator and the job queue
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod backoff;
pub mod config;
pub mod error;
pub mod models;
pub mod state_machine;
pub mod traits;

pub use backoff::BackoffPolicy;
pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
