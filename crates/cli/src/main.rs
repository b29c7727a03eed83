//! FlowSync command-line client and admin tool.
//!
//! Local subcommands (`init`, `validate`, `user`) work on the config file
//! and the server's database directly. Remote subcommands (`login`,
//! `workflows`, `edit`) talk to a running server through the REST API.

mod edit;
mod remote;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::Password;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use flowsync_core::config::AppConfig;
use flowsync_core::conflict::Choice;
use flowsync_core::db::Database;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// FlowSync command-line client.
#[derive(Parser, Debug)]
#[command(
    name = "flowsync",
    version,
    about = "Edit, inspect and administer FlowSync workflow documents"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./flowsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./flowsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Manage API user accounts (writes the server database directly).
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Log in and print a bearer token for FLOWSYNC_TOKEN.
    Login {
        /// Username to log in as.
        username: String,
    },

    /// Inspect workflows on the server.
    Workflows {
        #[command(subcommand)]
        action: WorkflowsAction,
    },

    /// Edit a workflow and save it with conflict detection.
    Edit {
        /// Workflow ID.
        id: String,

        /// New workflow name.
        #[arg(long)]
        name: Option<String>,

        /// New workflow description.
        #[arg(long)]
        description: Option<String>,

        /// Set a metadata entry (`key=value`; the value is parsed as JSON
        /// when possible). Repeatable.
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        metadata: Vec<String>,

        /// Remove a node (and its edges) by ID. Repeatable.
        #[arg(long = "remove-node", value_name = "NODE_ID")]
        remove_nodes: Vec<String>,

        /// Resolve conflicts without prompting.
        #[arg(long, value_enum)]
        on_conflict: Option<ConflictPolicy>,
    },
}

#[derive(Subcommand, Debug)]
enum UserAction {
    /// Create a user. Prompts for the password.
    Create {
        username: String,

        /// Grant admin rights.
        #[arg(long)]
        admin: bool,
    },
    /// Change a user's password.
    Password { username: String },
    /// List users.
    List,
}

#[derive(Subcommand, Debug)]
enum WorkflowsAction {
    /// List workflows.
    List {
        /// Number of workflows to skip.
        #[arg(long, default_value = "0")]
        skip: u32,

        /// Maximum number of workflows to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Show one workflow with its nodes and edges.
    Show { id: String },
    /// Export a workflow as JSON.
    Export {
        id: String,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the save history of a workflow.
    Logs { id: String },
    /// Make a workflow public and print its share token.
    Share { id: String },
    /// Delete a workflow.
    Delete {
        id: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Non-interactive answer to a save conflict.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Discard local edits and load the server version.
    UseServer,
    /// Resubmit local edits against the server's version.
    KeepLocal,
    /// Leave the conflict unresolved and save nothing.
    Cancel,
}

impl From<ConflictPolicy> for Choice {
    fn from(policy: ConflictPolicy) -> Self {
        match policy {
            ConflictPolicy::UseServer => Choice::UseServer,
            ConflictPolicy::KeepLocal => Choice::KeepLocal,
            ConflictPolicy::Cancel => Choice::Cancel,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::User { action } => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            cmd_user(&db, action)
        }
        Commands::Login { username } => {
            let config = load_config(&cli.config)?;
            remote::login(&config, &username).await
        }
        Commands::Workflows { action } => {
            let config = load_config(&cli.config)?;
            match action {
                WorkflowsAction::List { skip, limit } => remote::list(&config, skip, limit).await,
                WorkflowsAction::Show { id } => remote::show(&config, &id).await,
                WorkflowsAction::Export { id, output } => {
                    remote::export(&config, &id, output.as_deref()).await
                }
                WorkflowsAction::Logs { id } => remote::logs(&config, &id).await,
                WorkflowsAction::Share { id } => remote::share(&config, &id).await,
                WorkflowsAction::Delete { id, yes } => remote::delete(&config, &id, yes).await,
            }
        }
        Commands::Edit {
            id,
            name,
            description,
            metadata,
            remove_nodes,
            on_conflict,
        } => {
            let config = load_config(&cli.config)?;
            let edits = edit::Edits {
                name,
                description,
                metadata: metadata
                    .iter()
                    .map(|pair| parse_meta(pair))
                    .collect::<Result<_>>()?,
                remove_nodes,
            };
            edit::run(&config, &id, edits, on_conflict.map(Choice::from)).await
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load the config file, or fall back to defaults when the file does not
/// exist so that a bare `flowsync workflows list` works against a local
/// server.
fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file not found; using defaults");
        let mut config = AppConfig::default();
        config
            .resolve_env_vars()
            .context("failed to resolve environment variables")?;
        return Ok(config);
    }
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn open_database(config: &AppConfig) -> Result<Database> {
    std::fs::create_dir_all(&config.server.data_dir)
        .context("failed to create data directory")?;
    let db = Database::new(config.server.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# FlowSync Configuration

[server]
log_level = "info"
data_dir = "./data"

[web]
listen = "127.0.0.1:8000"
require_auth = true
session_ttl_hours = 24
# cors_origins = ["http://localhost:3000"]

[client]
api_url = "http://127.0.0.1:8000/api/v1"
token_env = "FLOWSYNC_TOKEN"
timeout_secs = 30
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Create a user: flowsync --config {} user create <name>", output.display());
    println!("  2. Start the server: flowsync-server --config {}", output.display());
    println!("  3. Log in: flowsync --config {} login <name>", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    // A missing token only matters for remote commands.
    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Web listen    : {}", config.web.listen);
    println!("  Require auth  : {}", config.web.require_auth);
    println!("  Session TTL   : {}h", config.web.session_ttl_hours);
    println!("  Database      : {}", config.server.database_path().display());
    println!("  API URL       : {}", config.client.api_url);
    println!(
        "  API token     : {}",
        if config.client.token.is_some() {
            "set".to_string()
        } else {
            format!("NOT SET (${})", config.client.token_env)
        }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_user(db: &Database, action: UserAction) -> Result<()> {
    match action {
        UserAction::Create { username, admin } => {
            let password = prompt_new_password(&username)?;
            db.create_user(&username, &password, admin)
                .context("failed to create user")?;
            println!("{}", style::success(&format!("User '{}' created", username)));
        }
        UserAction::Password { username } => {
            let password = prompt_new_password(&username)?;
            db.set_user_password(&username, &password)
                .context("failed to update password")?;
            println!("{}", style::success(&format!("Password for '{}' updated", username)));
        }
        UserAction::List => {
            let users = db.list_users().context("failed to list users")?;
            if users.is_empty() {
                println!("No users. Create one with: flowsync user create <name>");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Username", "Admin", "Created"]);
            for user in &users {
                table.add_row(vec![
                    Cell::new(&user.username),
                    Cell::new(if user.is_admin { "yes" } else { "" }),
                    Cell::new(user.created_at.format("%Y-%m-%d %H:%M")),
                ]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}

fn prompt_new_password(username: &str) -> Result<String> {
    let password = Password::new()
        .with_prompt(format!("Password for '{}'", username))
        .with_confirmation("Confirm password", "Passwords do not match")
        .validate_with(|input: &String| -> Result<(), String> {
            if input.len() >= 8 {
                Ok(())
            } else {
                Err("Password must be at least 8 characters".into())
            }
        })
        .interact()
        .context("failed to read password")?;
    Ok(password)
}

/// Parse a `key=value` metadata argument. The value is taken as JSON when
/// it parses, otherwise as a plain string.
fn parse_meta(pair: &str) -> Result<(String, serde_json::Value)> {
    let (key, raw) = pair
        .split_once('=')
        .with_context(|| format!("invalid metadata '{}': expected KEY=VALUE", pair))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("invalid metadata '{}': key is empty", pair);
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Truncate for table cells, respecting char boundaries.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
