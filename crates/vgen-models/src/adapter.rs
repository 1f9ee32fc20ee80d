//! Stage adapter interface.
//!
//! Every external capability (script generation, speech synthesis, rendering,
//! muxing, storage) sits behind [`StageAdapter`]. Adapters report failures as
//! [`AdapterError`] carrying a [`FailureClass`] so the executor can decide
//! between retrying and terminating the job.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::{Stage, StageOutput, StageRequest};

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network, timeout, rate limit: retry with backoff.
    Transient,
    /// Invalid input, quota exhausted, unrecoverable format error.
    Fatal,
}

impl FailureClass {
    /// Classify an HTTP status code returned by a provider.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            408 | 425 | 429 | 500..=599 => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }
}

/// Error family, one per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    GenerationError,
    SynthesisError,
    RenderError,
    AssemblyError,
    StorageError,
}

impl AdapterErrorKind {
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Script => AdapterErrorKind::GenerationError,
            Stage::Audio => AdapterErrorKind::SynthesisError,
            Stage::Visuals => AdapterErrorKind::RenderError,
            Stage::Assembly => AdapterErrorKind::AssemblyError,
            Stage::Publish => AdapterErrorKind::StorageError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterErrorKind::GenerationError => "GenerationError",
            AdapterErrorKind::SynthesisError => "SynthesisError",
            AdapterErrorKind::RenderError => "RenderError",
            AdapterErrorKind::AssemblyError => "AssemblyError",
            AdapterErrorKind::StorageError => "StorageError",
        }
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a stage adapter.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub class: FailureClass,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            kind,
            class,
            message: message.into(),
        }
    }

    pub fn transient(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, FailureClass::Transient, message)
    }

    pub fn fatal(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, FailureClass::Fatal, message)
    }

    /// Stage call exceeded its wall-clock budget.
    pub fn timeout(stage: Stage, limit: Duration) -> Self {
        Self::transient(
            AdapterErrorKind::for_stage(stage),
            format!("{} stage timed out after {}s", stage, limit.as_secs()),
        )
    }

    /// Error for an HTTP provider response, classified by status.
    pub fn from_http_status(kind: AdapterErrorKind, status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        Self::new(
            kind,
            FailureClass::from_http_status(status),
            format!("provider returned HTTP {}: {}", status, snippet),
        )
    }

    pub fn is_transient(&self) -> bool {
        self.class == FailureClass::Transient
    }
}

/// Uniform interface around one external capability.
///
/// Implementations may retry internally; whatever they finally return is
/// classified by the executor using [`AdapterError::class`].
#[async_trait]
pub trait StageAdapter: Send + Sync {
    /// Provider name used in logs and fallback bookkeeping.
    fn name(&self) -> &str;

    /// Stage this adapter serves.
    fn stage(&self) -> Stage;

    /// Run the capability for one job.
    async fn execute(&self, request: &StageRequest) -> AdapterResult<StageOutput>;
}
