//! WebSocket endpoint for live workflow updates.
//!
//! Clients connect to `/api/v1/ws` and receive a JSON message whenever a
//! workflow is saved (`workflow_saved`) or deleted (`workflow_deleted`).
//! Editors use these to notice that their known version went stale before
//! they try to save. Passing `workflow_id` limits the stream to one document.
//!
//! Pass the session token as a `token` query parameter
//! (`/api/v1/ws?token=<access_token>`). It is only optional when
//! authentication is disabled and no users exist.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::auth::session_user;
use crate::AppState;

/// Kind of a [`LiveUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    WorkflowSaved,
    WorkflowDeleted,
}

/// A change pushed to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveUpdate {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub workflow_id: String,
    /// New version for saves; absent for deletes.
    pub version: Option<i64>,
    pub modified_by: String,
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
    workflow_id: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/ws", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let open_access = !state.config.web.require_auth
        && state
            .db
            .count_users()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            == 0;

    if !open_access {
        let token = query.token.ok_or(StatusCode::UNAUTHORIZED)?;
        let username = session_user(&state, &token)
            .await
            .ok_or(StatusCode::UNAUTHORIZED)?;
        debug!(username = %username, "WebSocket upgrade authorized");
    }

    let rx = state.ws_broadcast.subscribe();
    let filter = query.workflow_id;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, rx, filter)))
}

async fn handle_socket(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<LiveUpdate>,
    workflow_id: Option<String>,
) {
    debug!(workflow_id = ?workflow_id, "WebSocket client connected");

    let welcome = serde_json::json!({
        "type": "connected",
        "message": "FlowSync live updates",
        "workflow_id": workflow_id,
    });
    if send_json(&mut socket, &welcome).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(update) => {
                        let wanted = workflow_id
                            .as_deref()
                            .map_or(true, |id| id == update.workflow_id);
                        if wanted && send_json(&mut socket, &update).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed updates may include a save; clients should refetch.
                        warn!("WebSocket client lagged by {} messages", n);
                        let lag_msg = serde_json::json!({
                            "type": "lagged",
                            "missed": n,
                        });
                        if send_json(&mut socket, &lag_msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("broadcast channel closed, disconnecting WebSocket");
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    debug!("WebSocket connection closed");
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_default();
    socket.send(Message::Text(text.into())).await.map_err(|e| {
        debug!("WebSocket send error (client disconnected?): {}", e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_update_wire_format() {
        let update = LiveUpdate {
            kind: UpdateKind::WorkflowSaved,
            workflow_id: "wf".into(),
            version: Some(3),
            modified_by: "alice".into(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "workflow_saved");
        assert_eq!(json["version"], 3);
    }
}
