//! Shared data models for the vgen pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Generation requests, styles and platforms
//! - Job records and their lifecycle rules
//! - Pipeline stages and inter-stage artifacts
//! - The stage adapter interface and failure classification
//! - Client-facing status projections

pub mod adapter;
pub mod job;
pub mod request;
pub mod stage;
pub mod status;

// Re-export common types
pub use adapter::{AdapterError, AdapterErrorKind, AdapterResult, FailureClass, StageAdapter};
pub use job::{
    CancelEffect, JobError, JobErrorKind, JobId, JobRecord, JobResult, JobState, JobUpdate,
    Recovery, StaleReason,
};
pub use request::{GenerationRequest, Platform, PlatformSpec, StyleArchetype};
pub use stage::{
    AssemblyInput, AssemblyOutput, AudioInput, AudioOutput, PublishInput, PublishOutput, Scene,
    ScriptInput, ScriptOutput, Stage, StageInput, StageOutput, StageOutputs, StageRequest,
    VisualsInput, VisualsOutput, VoiceConfig,
};
pub use status::{JobStatusView, ResultMetadata, SubmitResponse};
