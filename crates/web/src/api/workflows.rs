//! Workflow API endpoints.
//!
//! Updates are compare-and-swap on `version`: a `PUT` whose `known_version`
//! is stale is rejected with `409` and a [`ConflictPayload`] detail, and
//! nothing is written.
//!
//! [`ConflictPayload`]: flowsync_core::models::ConflictPayload

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use flowsync_core::models::{
    NewWorkflow, UpdateLog, WorkflowDocument, WorkflowExport, WorkflowUpdate,
};

use crate::api::auth::{auth_header, validate_session};
use crate::api::status::AppError;
use crate::ws::{LiveUpdate, UpdateKind};
use crate::AppState;

const MAX_PAGE: u32 = 100;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListWorkflowsQuery {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
struct ShareResponse {
    share_token: String,
    is_public: bool,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/api/v1/workflows/{id}",
            get(get_workflow)
                .put(update_workflow)
                .delete(delete_workflow),
        )
        .route("/api/v1/workflows/{id}/share", post(share_workflow))
        .route("/api/v1/workflows/{id}/export", get(export_workflow))
        .route("/api/v1/workflows/{id}/logs", get(workflow_logs))
        .route("/api/v1/workflows/shared/{token}", get(get_shared_workflow))
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<Vec<WorkflowDocument>>, AppError> {
    validate_session(&state, auth_header(&headers)).await?;

    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(MAX_PAGE).min(MAX_PAGE);
    Ok(Json(state.db.list_workflows(skip, limit)?))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewWorkflow>,
) -> Result<Json<WorkflowDocument>, AppError> {
    let username = validate_session(&state, auth_header(&headers)).await?;

    let doc = state.db.insert_workflow(&body, &username)?;
    broadcast(&state, UpdateKind::WorkflowSaved, &doc.id, Some(doc.version), &username);
    Ok(Json(doc))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDocument>, AppError> {
    validate_session(&state, auth_header(&headers)).await?;
    Ok(Json(state.db.get_workflow_entry(&id)?))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<WorkflowUpdate>,
) -> Result<Json<WorkflowDocument>, AppError> {
    let username = validate_session(&state, auth_header(&headers)).await?;

    let doc = state.db.update_workflow(&id, &body, &username)?;
    if doc.version != body.known_version {
        info!(id = %id, version = doc.version, username = %username, "workflow saved");
        broadcast(&state, UpdateKind::WorkflowSaved, &id, Some(doc.version), &username);
    }
    Ok(Json(doc))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let username = validate_session(&state, auth_header(&headers)).await?;

    if !state.db.delete_workflow(&id)? {
        return Err(AppError::NotFound("Workflow not found".into()));
    }
    broadcast(&state, UpdateKind::WorkflowDeleted, &id, None, &username);

    Ok(Json(serde_json::json!({
        "message": "Workflow deleted successfully",
    })))
}

async fn share_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ShareResponse>, AppError> {
    let username = validate_session(&state, auth_header(&headers)).await?;

    let doc = state.db.share_workflow(&id)?;
    let share_token = doc
        .share_token
        .ok_or_else(|| AppError::Internal("share token was not stored".into()))?;
    info!(id = %id, username = %username, "workflow shared");

    Ok(Json(ShareResponse {
        share_token,
        is_public: doc.is_public,
    }))
}

/// No authentication: the token itself grants read access.
async fn get_shared_workflow(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<WorkflowDocument>, AppError> {
    state
        .db
        .get_workflow_by_share_token(&token)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Workflow not found".into()))
}

async fn export_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<WorkflowExport>, AppError> {
    validate_session(&state, auth_header(&headers)).await?;
    Ok(Json(state.db.get_workflow_entry(&id)?.export()))
}

async fn workflow_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<UpdateLog>>, AppError> {
    validate_session(&state, auth_header(&headers)).await?;
    // 404 rather than an empty list for unknown ids.
    state.db.get_workflow_entry(&id)?;
    Ok(Json(state.db.list_update_logs(&id)?))
}

/// Push a live update to WebSocket clients.
fn broadcast(state: &AppState, kind: UpdateKind, id: &str, version: Option<i64>, username: &str) {
    // No connected clients is fine.
    let _ = state.ws_broadcast.send(LiveUpdate {
        kind,
        workflow_id: id.to_string(),
        version,
        modified_by: username.to_string(),
    });
}
