//! Health endpoint and the shared API error type.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::error;

use flowsync_core::errors::DatabaseError;
use flowsync_core::models::ConflictPayload;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/health", get(health_check))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// API error type that converts to an Axum response with a
/// `{"detail": ...}` body.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    /// Stale `known_version`; the body carries the conflict payload.
    Conflict(ConflictPayload),
    Unprocessable(String),
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, detail): (StatusCode, serde_json::Value) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.into()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.into()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.into()),
            AppError::Conflict(payload) => (
                StatusCode::CONFLICT,
                serde_json::to_value(payload).unwrap_or_default(),
            ),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.into()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.into()),
        };

        let body = serde_json::json!({ "detail": detail });
        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::VersionConflict {
                current_version,
                your_version,
                last_modified_by,
                ..
            } => AppError::Conflict(ConflictPayload::new(
                current_version,
                your_version,
                last_modified_by,
            )),
            DatabaseError::NotFound { entity, .. } if entity == "workflow" => {
                AppError::NotFound("Workflow not found".into())
            }
            DatabaseError::NotFound { entity, id } => {
                AppError::NotFound(format!("{} '{}' not found", entity, id))
            }
            DatabaseError::AlreadyExists { entity, id } => {
                AppError::BadRequest(format!("{} '{}' already exists", entity, id))
            }
            DatabaseError::Invalid(v) => AppError::Unprocessable(v.to_string()),
            other => {
                error!(error = %other, "database error");
                AppError::Internal(format!("database error: {}", other))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::response::IntoResponse;

    use flowsync_core::errors::ValidationError;

    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_conflict_body_carries_payload() {
        let err: AppError = DatabaseError::VersionConflict {
            id: "wf".into(),
            current_version: 2,
            your_version: 1,
            last_modified_by: Some("alice".into()),
        }
        .into();
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"]["current_version"], 2);
        assert_eq!(body["detail"]["your_version"], 1);
        assert_eq!(body["detail"]["last_modified_by"], "alice");
    }

    #[tokio::test]
    async fn test_validation_is_unprocessable() {
        let err: AppError = DatabaseError::Invalid(ValidationError::EmptyName).into();
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["detail"], "workflow name must not be empty");
    }

    #[tokio::test]
    async fn test_missing_workflow_is_not_found() {
        let err: AppError = DatabaseError::NotFound {
            entity: "workflow".into(),
            id: "abc".into(),
        }
        .into();
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Workflow not found");
    }
}
