//! Video generation worker.
//!
//! This crate provides:
//! - The staged pipeline executor with retries, fallbacks and cancellation
//! - A bounded worker pool that claims jobs from the shared store
//! - The liveness sweep that requeues jobs whose worker disappeared
//! - Gemini and text-to-speech stage adapters

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testing;

pub use adapters::build_pipeline;
pub use config::WorkerConfig;
pub use dispatcher::Dispatcher;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineExecutor, RunOutcome};
pub use retry::RetryPolicy;
pub use sweep::{LivenessSweep, SweepReport};
