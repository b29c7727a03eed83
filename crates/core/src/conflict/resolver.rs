//! Execution of dialog resolutions against a backend.

use tracing::info;

use super::detector::{ConflictDetector, SaveOutcome};
use super::dialog::Resolution;
use crate::backend::WorkflowBackend;
use crate::errors::BackendError;
use crate::models::WorkflowDocument;

/// What executing a [`Resolution`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverOutcome {
    /// The server copy, which replaces the draft.
    Reloaded(Box<WorkflowDocument>),
    /// Result of resubmitting the draft. May itself be another conflict.
    Resubmitted(SaveOutcome),
    /// The dialog was cancelled; nothing changed.
    Cancelled,
}

/// Stateless resolution operations.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Carry out `resolution` for `draft`.
    ///
    /// Only a failed re-fetch is an error. A failed resubmit is reported as
    /// [`SaveOutcome::Failed`] inside [`ResolverOutcome::Resubmitted`].
    pub async fn execute(
        backend: &dyn WorkflowBackend,
        resolution: Resolution,
        draft: &WorkflowDocument,
    ) -> Result<ResolverOutcome, BackendError> {
        match resolution {
            Resolution::Refetch { id } => {
                let server = backend.fetch(&id).await?;
                info!(id = %id, version = server.version, "loaded server version");
                Ok(ResolverOutcome::Reloaded(Box::new(server)))
            }
            Resolution::Resubmit { known_version } => {
                info!(id = %draft.id, known_version, "overriding server version");
                let outcome = ConflictDetector::attempt_save(backend, draft, known_version).await;
                Ok(ResolverOutcome::Resubmitted(outcome))
            }
            Resolution::Cancelled => Ok(ResolverOutcome::Cancelled),
        }
    }
}
