//! Authentication endpoints (username/password login, bearer-token sessions).

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::status::AppError;
use crate::{AppState, AuthSession};

/// Identity used when authentication is disabled and no users exist.
pub const ANONYMOUS: &str = "anonymous";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    access_token: String,
    token_type: &'static str,
    expires_at: String,
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    pub token: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = state.db.verify_user(&body.username, &body.password)?;
    let Some(user) = user else {
        warn!(username = %body.username, "failed login");
        return Err(AppError::Unauthorized(
            "Incorrect username or password".into(),
        ));
    };

    let token = Uuid::new_v4().to_string();
    let ttl_hours = i64::try_from(state.config.web.session_ttl_hours).unwrap_or(i64::MAX);
    let expires_at = Utc::now() + Duration::hours(ttl_hours.min(24 * 365));

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(
            token.clone(),
            AuthSession {
                username: user.username.clone(),
                expires_at,
            },
        );
    }
    info!(username = %user.username, "user logged in");

    Ok(Json(LoginResponse {
        access_token: token,
        token_type: "bearer",
        expires_at: expires_at.to_rfc3339(),
    }))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LogoutRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.remove(&body.token) {
        debug!(username = %session.username, "logged out");
    }

    Ok(Json(serde_json::json!({
        "ok": true,
        "message": "logged out",
    })))
}

/// Extract the raw `Authorization` header value.
pub fn auth_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok())
}

/// Resolve the caller of a protected endpoint.
///
/// Returns the session's username, or [`ANONYMOUS`] when authentication is
/// disabled and no users exist yet. Expired sessions are pruned on the way.
pub async fn validate_session(
    state: &Arc<AppState>,
    auth_header: Option<&str>,
) -> Result<String, AppError> {
    if !state.config.web.require_auth && state.db.count_users()? == 0 {
        return Ok(ANONYMOUS.to_string());
    }

    let token = auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("missing or invalid Authorization header".into()))?;

    session_user(state, token)
        .await
        .ok_or_else(|| AppError::Unauthorized("session expired or invalid".into()))
}

/// Username for a live session token.
pub async fn session_user(state: &Arc<AppState>, token: &str) -> Option<String> {
    let now = Utc::now();
    let mut sessions = state.sessions.write().await;
    sessions.retain(|_, s| s.expires_at > now);
    sessions.get(token).map(|s| s.username.clone())
}
