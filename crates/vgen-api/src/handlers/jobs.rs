//! Job submission, status polling and cancellation.
//!
//! Every read goes straight to the job store; nothing is cached here, so a
//! poll always reflects the latest durable state.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use vgen_models::{GenerationRequest, JobId, JobStatusView, SubmitResponse};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// `POST /generate`: validate and enqueue.
pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let request = payload
        .map_err(ApiError::from)
        .and_then(|Json(request)| {
            request.validate()?;
            Ok(request)
        })
        .inspect_err(|err| {
            if let ApiError::Validation { code, .. } = err {
                metrics::record_job_rejected(code);
            }
        })?;

    let job = state.queue.submit(request).await?;
    metrics::record_job_submitted(job.input.style.as_str(), job.input.platform.as_str());

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::new(job.id))))
}

/// `GET /status/:job_id`
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let job = state.queue.status(&JobId::from_string(job_id)).await?;
    Ok(Json(JobStatusView::from(&job)))
}

/// `POST /jobs/:job_id/cancel`: returns the projection after the request.
///
/// A running job keeps its state until the worker reaches the next stage
/// boundary; a queued job is failed immediately.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobStatusView>)> {
    let job_id = JobId::from_string(job_id);
    let effect = state.queue.cancel(&job_id).await?;
    metrics::record_cancel_requested();
    info!(job_id = %job_id, ?effect, "Cancel requested via API");

    let job = state.queue.status(&job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobStatusView::from(&job))))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobStatusView>,
}

/// `GET /jobs?limit=N`: newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let jobs = state.queue.list_recent(limit).await?;
    Ok(Json(JobListResponse {
        jobs: jobs.iter().map(JobStatusView::from).collect(),
    }))
}
