//! Data Transfer Objects (DTOs) for API requests and responses

pub mod calls;
pub mod common;
pub mod queue;

pub use calls::*;
pub use common::*;
pub use queue::*;
