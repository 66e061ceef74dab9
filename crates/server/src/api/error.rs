//! # API Errors
//!
//! Maps pipeline error categories onto HTTP statuses. Bodies carry the
//! stable category and a message, never an internal trace.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scholar_core::{ErrorCategory, PipelineError};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable error category, e.g. `stale_version`
    pub category: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorCategory::InvalidApproval => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::StaleVersion
        | ErrorCategory::NotAwaitingApproval
        | ErrorCategory::NoDraft
        | ErrorCategory::InvalidTransition
        | ErrorCategory::SessionBusy
        | ErrorCategory::SessionFailed => StatusCode::CONFLICT,
        ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::GenerationFailed | ErrorCategory::RetrievalFailed => StatusCode::BAD_GATEWAY,
        ErrorCategory::RetriesExhausted => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCategory::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Pipeline(err) => {
                let category = err.category();
                (
                    status_for(category),
                    ErrorBody {
                        category: category.as_str().to_string(),
                        message: err.to_string(),
                    },
                )
            }
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    category: "bad_request".to_string(),
                    message,
                },
            ),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        category: "internal".to_string(),
                        message: err.to_string(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
