//! Conflict detection on the save path.
//!
//! The detector sends the full draft together with the version the client
//! last observed and classifies the backend's answer. It never mutates the
//! draft; applying the outcome is up to the caller.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backend::WorkflowBackend;
use crate::errors::BackendError;
use crate::models::{ConflictInfo, WorkflowDocument, WorkflowUpdate};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of one save attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The backend accepted the draft and assigned `new_version`.
    Saved {
        new_version: i64,
        updated_at: DateTime<Utc>,
        /// The stored copy as returned by the backend.
        document: Box<WorkflowDocument>,
    },
    /// The stored version moved on; nothing was written.
    Conflict {
        current_version: i64,
        your_version: i64,
        last_modified_by: Option<String>,
        message: String,
    },
    /// Transport, validation or authorization failure. Safe to retry.
    Failed { reason: String },
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// The dialog payload for a `Conflict` outcome.
    pub fn conflict_info(&self) -> Option<ConflictInfo> {
        match self {
            Self::Conflict {
                current_version,
                your_version,
                last_modified_by,
                message,
            } => Some(ConflictInfo {
                message: message.clone(),
                current_version: *current_version,
                your_version: *your_version,
                last_modified_by: last_modified_by.clone(),
            }),
            _ => None,
        }
    }
}

/// Stateless save-path detector.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Send `draft` with `known_version` and classify the result.
    pub async fn attempt_save(
        backend: &dyn WorkflowBackend,
        draft: &WorkflowDocument,
        known_version: i64,
    ) -> SaveOutcome {
        debug!(id = %draft.id, known_version, "attempting save");
        let update = WorkflowUpdate::from_draft(draft, known_version);

        match backend.update(&draft.id, &update).await {
            Ok(saved) => {
                info!(id = %saved.id, new_version = saved.version, "workflow saved");
                SaveOutcome::Saved {
                    new_version: saved.version,
                    updated_at: saved.updated_at,
                    document: Box::new(saved),
                }
            }
            Err(BackendError::Conflict(payload)) => {
                if payload.current_version <= payload.your_version {
                    warn!(
                        id = %draft.id,
                        current_version = payload.current_version,
                        your_version = payload.your_version,
                        "backend reported a conflict without a newer version"
                    );
                } else {
                    info!(
                        id = %draft.id,
                        current_version = payload.current_version,
                        your_version = payload.your_version,
                        "save rejected: version conflict"
                    );
                }
                SaveOutcome::Conflict {
                    current_version: payload.current_version,
                    your_version: payload.your_version,
                    last_modified_by: payload.last_modified_by,
                    message: payload.message,
                }
            }
            Err(e) => {
                warn!(id = %draft.id, error = %e, "save failed");
                SaveOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::LocalBackend;
    use crate::db::Database;
    use crate::models::{ConflictPayload, NewWorkflow};

    struct Unreachable;

    #[async_trait]
    impl WorkflowBackend for Unreachable {
        async fn create(&self, _: &NewWorkflow) -> Result<WorkflowDocument, BackendError> {
            Err(BackendError::ParseError("offline".into()))
        }

        async fn fetch(&self, id: &str) -> Result<WorkflowDocument, BackendError> {
            Err(BackendError::NotFound(id.into()))
        }

        async fn update(
            &self,
            _: &str,
            _: &WorkflowUpdate,
        ) -> Result<WorkflowDocument, BackendError> {
            Err(BackendError::ApiError {
                status: 503,
                body: "unavailable".into(),
            })
        }
    }

    /// Always rejects with a conflict that is not actually newer.
    struct Confused;

    #[async_trait]
    impl WorkflowBackend for Confused {
        async fn create(&self, _: &NewWorkflow) -> Result<WorkflowDocument, BackendError> {
            Err(BackendError::ParseError("unsupported".into()))
        }

        async fn fetch(&self, id: &str) -> Result<WorkflowDocument, BackendError> {
            Err(BackendError::NotFound(id.into()))
        }

        async fn update(
            &self,
            _: &str,
            update: &WorkflowUpdate,
        ) -> Result<WorkflowDocument, BackendError> {
            Err(BackendError::Conflict(ConflictPayload::new(
                update.known_version,
                update.known_version,
                None,
            )))
        }
    }

    fn local(user: &str) -> LocalBackend {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        LocalBackend::new(Arc::new(db), user)
    }

    #[tokio::test]
    async fn test_saved_advances_version() {
        let backend = local("alice");
        let mut draft = backend
            .create(&NewWorkflow::new("Flow").with_description("Initial"))
            .await
            .unwrap();
        draft.description = Some("Updated".into());

        let outcome = ConflictDetector::attempt_save(&backend, &draft, 1).await;
        match outcome {
            SaveOutcome::Saved {
                new_version,
                document,
                ..
            } => {
                assert_eq!(new_version, 2);
                assert_eq!(document.description.as_deref(), Some("Updated"));
            }
            other => panic!("expected Saved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() {
        let backend = local("alice");
        let draft = backend.create(&NewWorkflow::new("Flow")).await.unwrap();
        assert!(ConflictDetector::attempt_save(&backend, &draft, 1)
            .await
            .is_saved());

        let outcome = ConflictDetector::attempt_save(&backend, &draft, 1).await;
        assert!(outcome.is_conflict());
        let info = outcome.conflict_info().unwrap();
        assert_eq!(info.current_version, 2);
        assert_eq!(info.your_version, 1);
        assert_eq!(info.last_modified_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_backend_failure_is_failed() {
        let backend = local("alice");
        let draft = backend.create(&NewWorkflow::new("Flow")).await.unwrap();

        let outcome = ConflictDetector::attempt_save(&Unreachable, &draft, 1).await;
        match outcome {
            SaveOutcome::Failed { reason } => assert!(reason.contains("503")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_increasing_conflict_still_reported() {
        let backend = local("alice");
        let draft = backend.create(&NewWorkflow::new("Flow")).await.unwrap();

        let outcome = ConflictDetector::attempt_save(&Confused, &draft, 1).await;
        assert_eq!(outcome.conflict_info().unwrap().current_version, 1);
    }
}
