//! Absence follow-up orchestration for Rollcall
//!
//! This crate ties the ports from `rollcall-core` together into the
//! follow-up workflow:
//!
//! ```text
//!  Scheduler ──> FollowUpTrigger ──> JobQueue ──> WorkerPool ──> TelephonyClient
//!      |                                ^              |
//!      └──> RetrySweep ─────────────────┘              v
//!                                                 CallRecordStore
//!                                                      ^
//!  provider webhooks ──> WebhookDispatcher ────────────┘
//!                              |
//!                              └──> SpeechPipeline, AttendanceGateway
//! ```
//!
//! # Services
//!
//! - `FollowUpTrigger` - end-of-day sweep over eligible absences
//! - `CallEnqueuer` - enqueue API for follow-ups and retries
//! - `JobProcessor` / `WorkerPool` - bounded, idempotent call placement
//! - `RetrySweep` - schedules and enqueues retries of unanswered calls
//! - `Scheduler` - local-time triggers for both sweeps
//! - `WebhookDispatcher` - drives the call state machine from webhooks
//! - `CallService` - manual call logging and call queries
//! - `Orchestrator` - owns all of the above, built once at start-up

pub mod calls;
pub mod dispatcher;
pub mod enqueue;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod policy;
pub mod processor;
pub mod records;
pub mod retry;
pub mod scheduler;
pub mod transitions;
pub mod trigger;
pub mod worker;

pub use calls::{CallService, ManualCallRequest};
pub use dispatcher::{WebhookDispatcher, WebhookReply};
pub use enqueue::CallEnqueuer;
pub use error::JobError;
pub use orchestrator::{Orchestrator, Ports};
pub use policy::FollowUpPolicy;
pub use processor::{JobProcessor, ProcessOutcome};
pub use retry::{RetrySweep, RetrySweepReport};
pub use scheduler::{Scheduler, SingleFlight};
pub use trigger::{FollowUpTrigger, SkipReason, SweepOutcome, SweepReport};
pub use worker::{JobSettlement, WorkerPool};
