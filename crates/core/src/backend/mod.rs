//! Backend collaborators: whoever owns the authoritative copy of a workflow.
//!
//! The editing session only talks to a [`WorkflowBackend`]. Two
//! implementations exist:
//! - [`HttpBackend`] -- the REST API (`/api/v1/workflows`) over `reqwest`.
//! - [`LocalBackend`] -- the SQLite store in-process, acting as a given user.
//!
//! Both must enforce the version check-and-increment atomically and report a
//! stale `known_version` as [`BackendError::Conflict`].

pub mod http;
pub mod local;

use async_trait::async_trait;

use crate::errors::BackendError;
use crate::models::{NewWorkflow, WorkflowDocument, WorkflowUpdate};

pub use http::{Credentials, HttpBackend};
pub use local::LocalBackend;

/// The operations the editing session needs from the authoritative store.
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    /// Create a workflow; the result carries the initial version.
    async fn create(&self, new: &NewWorkflow) -> Result<WorkflowDocument, BackendError>;

    /// Fetch the current copy of a workflow.
    async fn fetch(&self, id: &str) -> Result<WorkflowDocument, BackendError>;

    /// Apply `update` only if `update.known_version` is the stored version.
    async fn update(
        &self,
        id: &str,
        update: &WorkflowUpdate,
    ) -> Result<WorkflowDocument, BackendError>;
}
