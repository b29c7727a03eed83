//! Error types for the FlowSync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

use crate::models::ConflictPayload;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Dialog(#[from] DialogError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A workflow graph or document failed structural validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The workflow name is empty or whitespace.
    #[error("workflow name must not be empty")]
    EmptyName,

    /// Two nodes share the same id.
    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    /// Two edges share the same id.
    #[error("duplicate edge id '{0}'")]
    DuplicateEdgeId(String),

    /// An edge references a node that is not part of the document.
    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    /// A node has no string `label` in its data.
    #[error("node '{0}' is missing a label")]
    MissingLabel(String),

    /// The referenced node does not exist in the draft.
    #[error("node '{0}' not found")]
    UnknownNode(String),

    /// The referenced edge does not exist in the draft.
    #[error("edge '{0}' not found")]
    UnknownEdge(String),
}

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

/// Errors reported by a backend collaborator (HTTP API or local store).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The update was rejected because the stored version moved on.
    #[error("version conflict: server is at {}, you have {}", .0.current_version, .0.your_version)]
    Conflict(ConflictPayload),

    /// The workflow (or share token) does not exist.
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// Credentials are missing, expired or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend rejected the payload as structurally invalid.
    #[error("invalid workflow: {0}")]
    Invalid(#[from] ValidationError),

    /// HTTP-level transport error (network, TLS, timeout, etc.).
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("response parse error: {0}")]
    ParseError(String),

    /// The local store failed.
    #[error("store error: {0}")]
    Store(DatabaseError),
}

impl From<DatabaseError> for BackendError {
    /// Store errors that are part of the backend contract (stale version,
    /// unknown id, invalid document) keep their meaning; the rest are opaque.
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::VersionConflict {
                current_version,
                your_version,
                last_modified_by,
                ..
            } => BackendError::Conflict(ConflictPayload::new(
                current_version,
                your_version,
                last_modified_by,
            )),
            DatabaseError::NotFound { entity, id } => {
                BackendError::NotFound(format!("{} {}", entity, id))
            }
            DatabaseError::Invalid(v) => BackendError::Invalid(v),
            other => BackendError::Store(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Dialog errors
// ---------------------------------------------------------------------------

/// Invalid transitions of the conflict-resolution dialog.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DialogError {
    /// A conflict is already being shown.
    #[error("a conflict is already shown (server version {current_version})")]
    AlreadyShown { current_version: i64 },

    /// There is no conflict to resolve or cancel.
    #[error("no conflict is shown")]
    NotShown,
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors from the editing session that prevent an operation from starting.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The draft failed validation; nothing was sent.
    #[error("draft is invalid: {0}")]
    Validation(#[from] ValidationError),

    /// Another save for this document is still running.
    #[error("a save for workflow '{0}' is already in flight")]
    SaveInFlight(String),

    /// A conflict must be resolved before saving again.
    #[error("unresolved conflict with server version {current_version}")]
    ConflictPending { current_version: i64 },

    /// The session has been closed.
    #[error("editing session for workflow '{0}' is closed")]
    Closed(String),

    /// Invalid dialog transition.
    #[error(transparent)]
    Dialog(#[from] DialogError),

    /// Loading or re-fetching the document failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A record with the same key already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: String, id: String },

    /// The document to be stored failed validation.
    #[error("invalid workflow: {0}")]
    Invalid(#[from] ValidationError),

    /// Compare-and-swap on the workflow version failed.
    #[error("workflow {id} is at version {current_version}, update was based on {your_version}")]
    VersionConflict {
        id: String,
        current_version: i64,
        your_version: i64,
        last_modified_by: Option<String>,
    },

    /// A JSON column could not be encoded or decoded.
    #[error("database JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Password hashing or verification failed.
    #[error("password hash error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
