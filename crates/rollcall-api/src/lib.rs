//! API layer for Rollcall
//!
//! HTTP handlers for the telephony provider's webhooks, the enqueue API used
//! by the attendance subsystem, manual sweep triggers and statistics. Every
//! handler works through the shared [`rollcall_services::Orchestrator`],
//! registered as `web::Data<Orchestrator>`.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;

// Re-export DTOs (common types)
pub use dto::{ApiResponse, DateQuery};

pub use handlers::{
    configure_api, configure_auto_calls, configure_calls, configure_queue, configure_webhooks,
    health_check,
};
