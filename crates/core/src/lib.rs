//! FlowSync core library.
//!
//! This crate provides the building blocks for collaborative editing of
//! workflow graphs under optimistic concurrency: the document model and its
//! validation, configuration, SQLite persistence with compare-and-swap
//! updates, backend clients, conflict detection and resolution, and the
//! editing session that ties them together.

pub mod backend;
pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod models;
pub mod session;

// Re-exports for convenience.
pub use backend::{Credentials, HttpBackend, LocalBackend, WorkflowBackend};
pub use config::AppConfig;
pub use conflict::{Choice, SaveOutcome};
pub use db::Database;
pub use session::{EditingSession, SessionEvent, SessionHandle};
