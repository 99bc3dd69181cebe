//! Domain models for Rollcall

pub mod absence;
pub mod call_record;
pub mod job;
pub mod language;

pub use absence::{
    select_primary_contact, AbsenceReason, AttendanceStatus, CallContext, DtmfMeaning,
    EligibleAbsence, FollowUpStats, ParentContact,
};
pub use call_record::{
    CallCost, CallError, CallProvider, CallRecord, CallResponse, CallResult, CallStats,
    DialLease, Recording, RetryState,
};
pub use job::{EnqueueOptions, FollowUpJob, JobKind, JobPayload, JobState, QueueStats, QueuedJob};
pub use language::{DetectionMethod, Language, LanguageInfo};
