//! Rollcall Database Layer
//!
//! Storage for call attempts and the bridge to the attendance subsystem:
//!
//! - Connection pool management and migrations with sqlx
//! - `PgCallRecordStore`: optimistic-concurrency call record store
//! - `PgAttendanceGateway`: reads eligible absences, patches follow-up fields
//! - In-memory implementations of both for tests and database-less runs

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::{AbsenceEntry, InMemoryAttendanceGateway, InMemoryCallRecordStore};
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use rollcall_core::{AppError, AppResult};
pub use sqlx::PgPool;
