//! Client-facing projections of a job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobError, JobId, JobRecord, JobState};
use crate::stage::Stage;

const MAX_ERROR_MESSAGE_CHARS: usize = 300;

/// Metadata about the published artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Response body of the status endpoint.
///
/// Exposes no internal bookkeeping (owner, intermediate outputs, attempts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobStatusView {
    fn from(job: &JobRecord) -> Self {
        let error = job.error.as_ref().map(|e| JobError {
            kind: e.kind,
            stage: e.stage,
            message: truncate(&e.message),
        });

        Self {
            job_id: job.id.clone(),
            state: job.state,
            progress: job.progress,
            current_stage: job.current_stage,
            status_message: job.status_message.as_deref().map(truncate),
            output_url: job.result.as_ref().map(|r| r.artifact_uri.clone()),
            metadata: job.result.as_ref().map(|r| ResultMetadata {
                duration_seconds: r.duration_seconds,
                size_bytes: r.size_bytes,
            }),
            error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut short: String = message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
    short.push_str("...");
    short
}

/// Response body of a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub status_url: String,
}

impl SubmitResponse {
    pub fn new(job_id: JobId) -> Self {
        let status_url = format!("/status/{}", job_id);
        Self {
            job_id,
            state: JobState::Queued,
            status_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobErrorKind, JobResult, JobUpdate};
    use crate::request::GenerationRequest;

    #[test]
    fn test_queued_view_has_no_result_or_error() {
        let job = JobRecord::new(GenerationRequest::new("Tides"));
        let json = serde_json::to_value(JobStatusView::from(&job)).unwrap();
        assert_eq!(json["state"], "queued");
        assert_eq!(json["progress"], 0);
        assert!(json.get("output_url").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("owner").is_none());
    }

    #[test]
    fn test_completed_view_exposes_artifact() {
        let mut job = JobRecord::new(GenerationRequest::new("Tides"));
        job.claim("w", Utc::now()).unwrap();
        job.apply(
            JobUpdate::complete(
                "w",
                JobResult {
                    artifact_uri: "file:///tmp/out.mp4".into(),
                    duration_seconds: Some(12.5),
                    size_bytes: None,
                },
            ),
            Utc::now(),
        )
        .unwrap();

        let view = JobStatusView::from(&job);
        assert_eq!(view.output_url.as_deref(), Some("file:///tmp/out.mp4"));
        assert_eq!(view.progress, 100);
        assert_eq!(view.metadata.unwrap().duration_seconds, Some(12.5));
    }

    #[test]
    fn test_long_error_messages_are_truncated() {
        let mut job = JobRecord::new(GenerationRequest::new("Tides"));
        job.apply(
            JobUpdate::fail(
                None,
                JobError::new(JobErrorKind::Internal, None, "e".repeat(2000)),
            ),
            Utc::now(),
        )
        .unwrap();

        let view = JobStatusView::from(&job);
        assert!(view.error.unwrap().message.len() <= MAX_ERROR_MESSAGE_CHARS + 3);
    }

    #[test]
    fn test_submit_response_links_status() {
        let id = JobId::from_string("abc");
        let response = SubmitResponse::new(id);
        assert_eq!(response.status_url, "/status/abc");
        assert_eq!(response.state, JobState::Queued);
    }
}
