//! API error types.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use vgen_queue::QueueError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body failed validation; never enqueued.
    #[error("{detail}")]
    Validation { detail: String, code: &'static str },

    #[error("Rate limited")]
    RateLimited,

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn validation(detail: impl Into<String>, code: &'static str) -> Self {
        Self::Validation {
            detail: detail.into(),
            code,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Queue(QueueError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } | ApiError::Queue(QueueError::Validation(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Queue(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Queue(QueueError::JobNotFound(_)) => "not_found",
            ApiError::Validation { code, .. } => *code,
            ApiError::Queue(QueueError::Validation(_)) => "validation_error",
            ApiError::RateLimited => "rate_limited",
            ApiError::Queue(e) if e.is_unavailable() => "store_unavailable",
            ApiError::Queue(_) => "internal_error",
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let detail = fields
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) if *field == "__all__" => message.to_string(),
                    Some(message) => format!("{}: {}", field, message),
                    None => format!("{}: invalid ({})", field, e.code),
                })
            })
            .collect::<Vec<_>>()
            .join("; ");

        ApiError::validation(detail, "validation_error")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text(), "invalid_body")
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if self.is_internal()
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;
    use vgen_models::{GenerationRequest, JobId};

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::from(QueueError::JobNotFound(JobId::new())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(QueueError::connection_failed("down")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(QueueError::store("corrupt record")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::validation("bad", "validation_error").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_validation_detail_names_fields() {
        let mut request = GenerationRequest::new("ab");
        request.duration = 5;
        let err = ApiError::from(request.validate().unwrap_err());

        let ApiError::Validation { detail, code } = err else {
            panic!("expected validation error");
        };
        assert_eq!(code, "validation_error");
        assert!(detail.starts_with("duration:"));
        assert!(detail.contains("topic: topic must be 3 to 500 characters"));
    }
}
