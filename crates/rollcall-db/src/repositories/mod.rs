//! PostgreSQL implementations of the rollcall-core storage ports

pub mod attendance_repo;
pub mod call_record_repo;

pub use attendance_repo::PgAttendanceGateway;
pub use call_record_repo::PgCallRecordStore;
