//! Artifact storage.
//!
//! This crate provides:
//! - File upload and presigned URLs for Cloudflare R2
//! - Publish-stage adapters for R2 and a local directory

pub mod client;
pub mod error;
pub mod publish;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use publish::{artifact_key, LocalPublisher, PublishConfig, R2Publisher};
