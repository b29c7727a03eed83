//! FlowSync web server and REST API.
//!
//! Provides an Axum-based HTTP server with:
//! - Health endpoint
//! - Workflow CRUD with optimistic-concurrency updates (`409` on conflict)
//! - Sharing, export and update-log endpoints
//! - WebSocket endpoint for live save/delete notifications
//! - Username/password login issuing bearer-token sessions

pub mod api;
pub mod ws;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use flowsync_core::config::AppConfig;
use flowsync_core::db::Database;

/// A logged-in API session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: Arc<Database>,
    pub config: AppConfig,
    /// Broadcast channel for live WebSocket updates.
    pub ws_broadcast: broadcast::Sender<ws::LiveUpdate>,
    /// Active sessions (token -> session).
    pub sessions: RwLock<HashMap<String, AuthSession>>,
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server over an initialized database.
    pub fn new(config: AppConfig, db: Arc<Database>) -> Self {
        let (ws_tx, _) = broadcast::channel(256);
        let state = Arc::new(AppState {
            db,
            config,
            ws_broadcast: ws_tx,
            sessions: RwLock::new(HashMap::new()),
        });
        Self { state }
    }

    /// Build the application router.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(api::status::routes())
            .merge(api::auth::routes())
            .merge(api::workflows::routes())
            .merge(ws::routes())
            .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB max request body
            .layer(TraceLayer::new_for_http())
            .layer(self.cors_layer())
            .with_state(self.state.clone())
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = &self.state.config.web.cors_origins;
        let allow_origin = if origins.is_empty() {
            AllowOrigin::any()
        } else {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match HeaderValue::from_str(o) {
                    Ok(v) => Some(v),
                    Err(_) => {
                        warn!(origin = %o, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(parsed)
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    }

    /// Start the web server, listening on the given address.
    pub async fn start(self, listen_addr: &str) -> anyhow::Result<()> {
        let listener = Self::bind(listen_addr).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Bind a listener for `listen_addr`.
    pub async fn bind(listen_addr: &str) -> anyhow::Result<TcpListener> {
        let addr: SocketAddr = listen_addr.parse()?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        info!(addr = %listener.local_addr()?, "starting web server");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("web server stopped");
        Ok(())
    }
}
