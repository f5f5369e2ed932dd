//! API error types.
//!
//! Component errors are mapped onto a small set of HTTP-facing kinds here;
//! the controller itself never deals in status codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Serialize;

use crate::controller::SubmitStageError;
use crate::controller::UpdateAdapterError;
use crate::results::ResultsError;
use crate::store::StoreError;

/// An API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error kind.
    pub kind: String,
    /// Error message.
    pub message: String,
    /// Validation errors, present only for `ValidationError`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    /// Validation warnings, present only for `ValidationError`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

/// An API error type.
#[derive(Debug)]
pub enum Error {
    /// A "bad request" error (`400`).
    BadRequest(String),

    /// A missing stage prerequisite (`400`).
    Dependency(String),

    /// A preflight validation failure (`400`), carrying the error and
    /// warning lists.
    Validation {
        /// Short failure message.
        message: String,
        /// Conditions that blocked submission.
        errors: Vec<String>,
        /// Non-blocking conditions worth surfacing.
        warnings: Vec<String>,
    },

    /// A "not found" error (`404`).
    NotFound(String),

    /// A "conflict" error (`409`).
    Conflict(String),

    /// A completed stage submitted without rerun confirmation (`409`).
    RerunRequired(String),

    /// A scheduler command failure or timeout (`502`).
    Scheduler(String),

    /// An "internal server" error (`500`) with a diagnostic.
    Internal(String),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            StoreError::Conflict(_) => Self::Conflict(err.to_string()),
            StoreError::Corrupt { .. } | StoreError::Io { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<SubmitStageError> for Error {
    fn from(err: SubmitStageError) -> Self {
        match err {
            SubmitStageError::Store(e) => e.into(),
            SubmitStageError::Validation { stage, validation } => Self::Validation {
                message: format!("validation failed for stage `{stage}`"),
                errors: validation.errors,
                warnings: validation.warnings,
            },
            e @ SubmitStageError::Dependency { .. } => Self::Dependency(e.to_string()),
            e @ SubmitStageError::RerunRequired(_) => Self::RerunRequired(e.to_string()),
            e @ SubmitStageError::Cleanup { .. } => Self::Internal(e.to_string()),
            SubmitStageError::Template(e) => Self::Internal(e.to_string()),
            SubmitStageError::Scheduler(e) => Self::Scheduler(e.to_string()),
        }
    }
}

impl From<UpdateAdapterError> for Error {
    fn from(err: UpdateAdapterError) -> Self {
        match err {
            UpdateAdapterError::Store(e) => e.into(),
            e @ UpdateAdapterError::TrimRunning => Self::Conflict(e.to_string()),
        }
    }
}

impl From<ResultsError> for Error {
    fn from(err: ResultsError) -> Self {
        match err {
            ResultsError::Store(e) => e.into(),
            ResultsError::NotFound(_) => Self::NotFound(err.to_string()),
            ResultsError::UnknownFileType(_) => Self::BadRequest(err.to_string()),
            ResultsError::InvalidPath(_) => Self::BadRequest(err.to_string()),
            ResultsError::Io { .. } | ResultsError::Malformed { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind, message, errors, warnings) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BadRequest", msg, None, None),
            Self::Dependency(msg) => {
                (StatusCode::BAD_REQUEST, "DependencyError", msg, None, None)
            }
            Self::Validation {
                message,
                errors,
                warnings,
            } => (
                StatusCode::BAD_REQUEST,
                "ValidationError",
                message,
                Some(errors),
                Some(warnings),
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "NotFound", msg, None, None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", msg, None, None),
            Self::RerunRequired(msg) => {
                (StatusCode::CONFLICT, "RerunRequired", msg, None, None)
            }
            Self::Scheduler(msg) => (StatusCode::BAD_GATEWAY, "SchedulerError", msg, None, None),
            Self::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal", msg, None, None)
            }
        };

        let body = Json(ErrorResponse {
            kind: kind.to_string(),
            message,
            errors,
            warnings,
        });

        (status, body).into_response()
    }
}
