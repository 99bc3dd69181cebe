//! Call job queue for Rollcall
//!
//! Durable, retryable queue of call intents consumed by the worker pool.
//!
//! # Features
//!
//! - Redis backend via ConnectionManager, with an atomic Lua reserve step
//! - Priorities, delayed jobs and per-job backoff options
//! - Capped completed/failed history for statistics
//! - Pause/resume, drain and stalled-job recovery
//! - In-memory backend with the same semantics for tests and local runs

pub mod keys;
pub mod memory;
pub mod redis_queue;

pub use memory::InMemoryJobQueue;
pub use redis_queue::RedisJobQueue;
