//! In-process backend over the SQLite store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::WorkflowBackend;
use crate::db::Database;
use crate::errors::BackendError;
use crate::models::{NewWorkflow, WorkflowDocument, WorkflowUpdate};

/// A [`WorkflowBackend`] that writes straight to a [`Database`], attributing
/// every change to `username`.
///
/// Several `LocalBackend`s may share one database to model several users
/// editing concurrently; the store's compare-and-swap arbitrates.
#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Database>,
    username: String,
}

impl LocalBackend {
    pub fn new(db: Arc<Database>, username: impl Into<String>) -> Self {
        Self {
            db,
            username: username.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

#[async_trait]
impl WorkflowBackend for LocalBackend {
    async fn create(&self, new: &NewWorkflow) -> Result<WorkflowDocument, BackendError> {
        Ok(self.db.insert_workflow(new, &self.username)?)
    }

    async fn fetch(&self, id: &str) -> Result<WorkflowDocument, BackendError> {
        Ok(self.db.get_workflow_entry(id)?)
    }

    async fn update(
        &self,
        id: &str,
        update: &WorkflowUpdate,
    ) -> Result<WorkflowDocument, BackendError> {
        debug!(id, known_version = update.known_version, user = %self.username, "local update");
        Ok(self.db.update_workflow(id, update, &self.username)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_db() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn test_changes_are_attributed_to_user() {
        let db = shared_db();
        let alice = LocalBackend::new(db.clone(), "alice");
        let bob = LocalBackend::new(db, "bob");

        let doc = alice.create(&NewWorkflow::new("Flow")).await.unwrap();
        assert_eq!(doc.owner_id, "alice");

        let mut update = WorkflowUpdate::empty(doc.version);
        update.name = Some("Renamed".into());
        let saved = bob.update(&doc.id, &update).await.unwrap();
        assert_eq!(saved.last_modified_by.as_deref(), Some("bob"));
        assert_eq!(saved.version, 2);
    }

    #[tokio::test]
    async fn test_errors_keep_their_meaning() {
        let backend = LocalBackend::new(shared_db(), "alice");
        assert!(matches!(
            backend.fetch("missing").await,
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(
            backend.create(&NewWorkflow::new("")).await,
            Err(BackendError::Invalid(_))
        ));

        let doc = backend.create(&NewWorkflow::new("Flow")).await.unwrap();
        let result = backend.update(&doc.id, &WorkflowUpdate::empty(7)).await;
        match result {
            Err(BackendError::Conflict(payload)) => {
                assert_eq!(payload.current_version, 1);
                assert_eq!(payload.your_version, 7);
            }
            other => panic!("expected Conflict, got {:?}", other),
        }
    }
}
