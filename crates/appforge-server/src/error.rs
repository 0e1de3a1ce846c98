//! HTTP error types for the appforge server.
//!
//! Maps domain errors from `appforge-core` into HTTP responses. Every error
//! variant produces a JSON body with a machine-readable `error` field and a
//! human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use appforge_core::error::PersistenceError;
use appforge_core::validator::FieldError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Missing or wrong admin token.
    Unauthorized(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// The configuration does not satisfy the template schema.
    Validation(Vec<FieldError>),
    /// A conflict (duplicate slug, stale version).
    Conflict(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message, errors) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg, Vec::new()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, Vec::new()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, Vec::new()),
            Self::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_failed",
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
                errors,
            ),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, Vec::new()),
            Self::Internal(msg) => {
                error!(message = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, Vec::new())
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
            errors,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound { .. } => Self::NotFound(err.to_string()),
            PersistenceError::Conflict(msg) => Self::Conflict(msg),
            PersistenceError::Unauthorized(msg) => Self::Unauthorized(msg),
            PersistenceError::InvalidRequest(msg) => Self::BadRequest(msg),
            PersistenceError::Rejected { status, message } => match status {
                404 => Self::NotFound(message),
                409 => Self::Conflict(message),
                400..=499 => Self::BadRequest(message),
                _ => Self::Internal(message),
            },
            PersistenceError::Transport(_)
            | PersistenceError::Storage(_)
            | PersistenceError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn persistence_errors_map_to_statuses() {
        let (status, json) = body(PersistenceError::not_found("app 'x'").into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");

        let (status, json) = body(PersistenceError::Conflict("taken".into()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["message"], "taken");

        let (status, _) = body(PersistenceError::InvalidRequest("bad slug".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn validation_lists_field_errors() {
        let (status, json) = body(AppError::Validation(vec![FieldError::new(
            "general.title",
            "is required",
        )]))
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["errors"][0]["path"], "general.title");
        assert_eq!(json["message"], "general.title: is required");
    }
}
