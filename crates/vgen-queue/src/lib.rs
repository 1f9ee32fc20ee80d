//! Durable job store and submission queue.
//!
//! This crate provides:
//! - The [`JobStore`] contract with atomic claim and conditional update
//! - A Redis implementation using compare-and-set Lua scripts
//! - An in-memory implementation for tests and local runs
//! - [`JobQueue`], the validated submission entry point

pub mod error;
pub mod memory;
pub mod queue;
pub mod redis_store;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryJobStore;
pub use queue::{JobQueue, QueueConfig, StoreBackend};
pub use redis_store::RedisJobStore;
pub use store::{JobStore, RecoveryReport, UpdateOutcome};
