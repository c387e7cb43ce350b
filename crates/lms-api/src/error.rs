use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use lms_db::MessageError;
use lms_types::api::ErrorResponse;

/// Every failure a handler can report. Rendered as
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    BadRequest(String),

    /// A body, query string or path segment the extractors could not parse.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Rejected { status, message } => (*status, message.clone()),
            ApiError::Message(err) => match err {
                MessageError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                MessageError::RecipientNotFound(_) | MessageError::NotFound { .. } => {
                    (StatusCode::NOT_FOUND, err.to_string())
                }
                MessageError::Forbidden(_) | MessageError::PolicyViolation(_) => {
                    warn!("Refused: {}", err);
                    (StatusCode::FORBIDDEN, err.to_string())
                }
                MessageError::EmptyAudience => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
                MessageError::Store(e) => {
                    error!("Store error: {:#}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Something went wrong, please try again".to_string(),
                    )
                }
            },
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong, please try again".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            success: false,
            error: message,
        };
        (status, Json(body)).into_response()
    }
}
