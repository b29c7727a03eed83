//! FlowSync server entry point.
//!
//! Loads configuration, opens the workflow database, serves the REST API
//! and shuts down gracefully on SIGINT/SIGTERM.

mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowsync_core::config::AppConfig;
use flowsync_core::db::Database;
use flowsync_web::WebServer;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// FlowSync API server.
#[derive(Parser, Debug)]
#[command(
    name = "flowsync-server",
    version,
    about = "Workflow document API with optimistic concurrency"
)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the listen address from the config file.
    #[arg(long)]
    listen: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => {
            AppConfig::load_and_resolve(path).context("failed to load configuration file")?
        }
        None => AppConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.web.listen = listen;
    }
    config
        .validate()
        .context("configuration validation failed")?;

    // Initialize tracing
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    // Startup banner
    info!("========================================");
    info!("  FlowSync Server v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    match args.config {
        Some(ref path) => info!("Config file   : {}", path.display()),
        None => info!("Config file   : (defaults)"),
    }
    info!("Web listen    : {}", config.web.listen);
    info!("Require auth  : {}", config.web.require_auth);
    info!("Session TTL   : {}h", config.web.session_ttl_hours);
    info!("Data dir      : {}", config.server.data_dir.display());
    info!("Log level     : {}", log_level);
    info!("========================================");

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir)
        .context("failed to create data directory")?;

    // Initialize database
    let db_path = config.server.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize()
        .context("failed to initialize database schema")?;
    info!("Database initialized at {}", db_path.display());
    let workflows = db.count_workflows().context("failed to count workflows")?;
    info!("Workflows     : {}", workflows);

    let users = db.count_users().context("failed to count users")?;
    if users == 0 {
        if config.web.require_auth {
            warn!("no users exist; create one with `flowsync user create` before logging in");
        } else {
            warn!("no users exist and auth is not required; requests run as 'anonymous'");
        }
    }

    // Serve until a shutdown signal arrives
    let listener = WebServer::bind(&config.web.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.web.listen))?;
    let web_server = WebServer::new(config, Arc::new(db));
    web_server
        .serve(listener, signals::wait_for_shutdown())
        .await
        .context("web server error")?;

    info!("FlowSync server stopped.");
    Ok(())
}
