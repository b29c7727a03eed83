//! TOML-based configuration system for FlowSync.
//!
//! Sensitive values (the client bearer token) are stored as `_env` fields that
//! reference environment variable names. The actual secrets are resolved at
//! runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server process settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// HTTP API settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Settings for clients talking to a remote FlowSync API.
    #[serde(default)]
    pub client: ClientConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Server process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the SQLite database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/flowsync")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl ServerConfig {
    /// Path of the SQLite database inside `data_dir`.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("flowsync.db")
    }
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (default `127.0.0.1:8000`).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Require a bearer token on workflow endpoints. When `false` and no users
    /// exist, requests are attributed to `anonymous`.
    #[serde(default = "default_true")]
    pub require_auth: bool,

    /// Lifetime of a login session in hours.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: u64,

    /// Allowed CORS origins (empty = any).
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_listen() -> String {
    "127.0.0.1:8000".into()
}
fn default_true() -> bool {
    true
}
fn default_session_ttl() -> u64 {
    24
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            require_auth: true,
            session_ttl_hours: default_session_ttl(),
            cors_origins: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Remote API client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the API, including the `/api/v1` prefix.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8000/api/v1".into()
}
fn default_token_env() -> String {
    "FLOWSYNC_TOKEN".into()
}
fn default_timeout() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            timeout_secs: default_timeout(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning but does not fail; callers decide
    /// whether the token is required for what they are doing.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");
        self.client.token = resolve_optional_env(&self.client.token_env, "client.token_env");
        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web.listen.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "web.listen".into(),
                detail: "listen address must not be empty".into(),
            });
        }
        if self.web.session_ttl_hours == 0 {
            return Err(ConfigError::InvalidValue {
                field: "web.session_ttl_hours".into(),
                detail: "session lifetime must be > 0".into(),
            });
        }
        if !(self.client.api_url.starts_with("http://")
            || self.client.api_url.starts_with("https://"))
        {
            return Err(ConfigError::InvalidValue {
                field: "client.api_url".into(),
                detail: "API URL must start with http:// or https://".into(),
            });
        }
        if self.client.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "client.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// The client token, or an error naming the variable that should hold it.
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.client
            .token
            .as_deref()
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.client.token_env.clone(),
                field: "client.token_env".into(),
            })
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[server]
log_level = "debug"
data_dir = "/tmp/flowsync"

[web]
listen = "0.0.0.0:9000"
require_auth = false
session_ttl_hours = 8
cors_origins = ["http://localhost:3000"]

[client]
api_url = "https://flows.example.com/api/v1"
token_env = "FLOWSYNC_TEST_TOKEN"
timeout_secs = 5
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.web.listen, "0.0.0.0:9000");
        assert!(!config.web.require_auth);
        assert_eq!(config.web.cors_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.client.timeout_secs, 5);
        assert_eq!(
            config.server.database_path(),
            PathBuf::from("/tmp/flowsync/flowsync.db")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.web.session_ttl_hours, 8);
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_bad_api_url() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.client.api_url = "ftp://example.com".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "client.api_url"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.web.session_ttl_hours = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "web.session_ttl_hours"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("FLOWSYNC_RESOLVE_TEST", "tok_abc");

        let mut config: AppConfig = toml::from_str(
            r#"
[client]
token_env = "FLOWSYNC_RESOLVE_TEST"
"#,
        )
        .unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.require_token().unwrap(), "tok_abc");

        std::env::remove_var("FLOWSYNC_RESOLVE_TEST");
    }

    #[test]
    fn test_missing_token_names_variable() {
        let config: AppConfig = toml::from_str(
            r#"
[client]
token_env = "FLOWSYNC_DEFINITELY_UNSET"
"#,
        )
        .unwrap();
        match config.require_token() {
            Err(ConfigError::EnvVarMissing { var, .. }) => {
                assert_eq!(var, "FLOWSYNC_DEFINITELY_UNSET")
            }
            other => panic!("expected EnvVarMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.server.data_dir, PathBuf::from("/var/lib/flowsync"));
        assert_eq!(config.web.listen, "127.0.0.1:8000");
        assert!(config.web.require_auth);
        assert_eq!(config.client.api_url, "http://127.0.0.1:8000/api/v1");
        assert_eq!(config.client.token_env, "FLOWSYNC_TOKEN");
        assert!(config.validate().is_ok());
    }
}
