//! The editing session: owns the local draft of one workflow and drives the
//! save / conflict / resolve cycle against a [`WorkflowBackend`].
//!
//! Local edits only touch the in-memory draft. They become durable after a
//! [`SaveOutcome::Saved`]; [`EditingSession::reload`] always reflects the
//! last saved state. Outcomes are also published as [`SessionEvent`]s for
//! observers that do not hold the session.
//!
//! All methods take `&self`, so a session can be shared (e.g. in an `Arc`)
//! between a UI task and background work. At most one save, resolution or
//! reload runs at a time per session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::WorkflowBackend;
use crate::conflict::{
    Choice, ConflictDetector, ConflictDialog, ConflictResolver, DialogState, ResolverOutcome,
    SaveOutcome,
};
use crate::errors::{SessionError, ValidationError};
use crate::models::{ConflictInfo, Edge, NewWorkflow, Node, Position, WorkflowDocument};

const EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Events and handle
// ---------------------------------------------------------------------------

/// Notifications emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A save was rejected; the dialog is now shown.
    Conflict(ConflictInfo),
    /// A save (or override) succeeded.
    Saved { new_version: i64 },
    /// A save failed for a reason other than a conflict.
    Failed { reason: String },
}

/// Cloneable lifecycle handle for an [`EditingSession`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    document_id: Arc<str>,
    open: Arc<AtomicBool>,
    saving: Arc<AtomicBool>,
}

impl SessionHandle {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: Arc::from(document_id),
            open: Arc::new(AtomicBool::new(true)),
            saving: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Close the session. Calls already in flight run to completion but
    /// their outcomes are dropped.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            info!(id = %self.document_id, "editing session closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }
}

/// Holds the in-flight flag; releases it on drop.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct SessionState {
    draft: WorkflowDocument,
    saved: WorkflowDocument,
    known_version: i64,
    dialog: ConflictDialog,
}

/// Editing session for one workflow document.
pub struct EditingSession {
    backend: Arc<dyn WorkflowBackend>,
    id: String,
    state: Mutex<SessionState>,
    handle: SessionHandle,
    events: broadcast::Sender<SessionEvent>,
}

impl EditingSession {
    /// Load `id` from the backend and start editing it.
    pub async fn open(backend: Arc<dyn WorkflowBackend>, id: &str) -> Result<Self, SessionError> {
        let doc = backend.fetch(id).await?;
        info!(id = %doc.id, version = doc.version, "opened editing session");
        Ok(Self::from_document(backend, doc))
    }

    /// Create a new workflow and start editing it.
    pub async fn create(
        backend: Arc<dyn WorkflowBackend>,
        new: NewWorkflow,
    ) -> Result<Self, SessionError> {
        new.validate()?;
        let doc = backend.create(&new).await?;
        info!(id = %doc.id, version = doc.version, "created workflow for editing");
        Ok(Self::from_document(backend, doc))
    }

    fn from_document(backend: Arc<dyn WorkflowBackend>, doc: WorkflowDocument) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            id: doc.id.clone(),
            handle: SessionHandle::new(&doc.id),
            state: Mutex::new(SessionState {
                known_version: doc.version,
                dialog: ConflictDialog::new(doc.id.clone()),
                draft: doc.clone(),
                saved: doc,
            }),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current draft.
    pub fn draft(&self) -> WorkflowDocument {
        self.lock().draft.clone()
    }

    /// Snapshot of the last state known to be persisted.
    pub fn saved(&self) -> WorkflowDocument {
        self.lock().saved.clone()
    }

    pub fn known_version(&self) -> i64 {
        self.lock().known_version
    }

    pub fn conflict(&self) -> Option<ConflictInfo> {
        self.lock().dialog.conflict().cloned()
    }

    pub fn dialog_state(&self) -> DialogState {
        self.lock().dialog.state().clone()
    }

    /// Whether the draft's editable fields differ from the last saved state.
    pub fn is_dirty(&self) -> bool {
        let state = self.lock();
        !same_content(&state.draft, &state.saved)
    }

    // -- draft edits --------------------------------------------------------

    pub fn set_name(&self, name: impl Into<String>) {
        self.lock().draft.name = name.into();
    }

    /// An empty description clears it.
    pub fn set_description(&self, description: impl Into<String>) {
        let description = description.into();
        self.lock().draft.description = (!description.is_empty()).then_some(description);
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.lock().draft.metadata.insert(key.into(), value);
    }

    pub fn add_node(&self, node: Node) -> Result<(), ValidationError> {
        let mut state = self.lock();
        if state.draft.node(&node.id).is_some() {
            return Err(ValidationError::DuplicateNodeId(node.id));
        }
        state.draft.nodes.push(node);
        Ok(())
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&self, node_id: &str) -> Result<Node, ValidationError> {
        let mut state = self.lock();
        let draft = &mut state.draft;
        let idx = draft
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| ValidationError::UnknownNode(node_id.to_string()))?;
        let removed = draft.nodes.remove(idx);
        let before = draft.edges.len();
        draft
            .edges
            .retain(|e| e.source != node_id && e.target != node_id);
        debug!(
            node_id,
            dropped_edges = before - draft.edges.len(),
            "removed node"
        );
        Ok(removed)
    }

    pub fn move_node(&self, node_id: &str, x: f64, y: f64) -> Result<(), ValidationError> {
        let mut state = self.lock();
        let node = node_mut(&mut state.draft, node_id)?;
        node.position = Position::new(x, y);
        Ok(())
    }

    pub fn set_node_data(
        &self,
        node_id: &str,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), ValidationError> {
        let mut state = self.lock();
        let node = node_mut(&mut state.draft, node_id)?;
        node.data.insert(key.into(), value);
        Ok(())
    }

    pub fn add_edge(&self, edge: Edge) -> Result<(), ValidationError> {
        let mut state = self.lock();
        let draft = &mut state.draft;
        if draft.edges.iter().any(|e| e.id == edge.id) {
            return Err(ValidationError::DuplicateEdgeId(edge.id));
        }
        for endpoint in [&edge.source, &edge.target] {
            if draft.node(endpoint).is_none() {
                return Err(ValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        draft.edges.push(edge);
        Ok(())
    }

    pub fn remove_edge(&self, edge_id: &str) -> Result<Edge, ValidationError> {
        let mut state = self.lock();
        let edges = &mut state.draft.edges;
        let idx = edges
            .iter()
            .position(|e| e.id == edge_id)
            .ok_or_else(|| ValidationError::UnknownEdge(edge_id.to_string()))?;
        Ok(edges.remove(idx))
    }

    // -- backend operations -------------------------------------------------

    /// Save the draft.
    ///
    /// Refused without contacting the backend when the session is closed,
    /// another save is running, a conflict is pending, or the draft is
    /// invalid. Otherwise the outcome is applied and published.
    pub async fn save(&self) -> Result<SaveOutcome, SessionError> {
        self.ensure_open()?;
        let _guard = InFlightGuard::acquire(&self.handle.saving)
            .ok_or_else(|| SessionError::SaveInFlight(self.id.clone()))?;

        let (draft, known_version) = {
            let state = self.lock();
            if let Some(info) = state.dialog.conflict() {
                return Err(SessionError::ConflictPending {
                    current_version: info.current_version,
                });
            }
            state.draft.validate()?;
            (state.draft.clone(), state.known_version)
        };

        let outcome =
            ConflictDetector::attempt_save(self.backend.as_ref(), &draft, known_version).await;
        self.apply_save_outcome(&outcome)?;
        Ok(outcome)
    }

    /// Resolve the shown conflict with `choice` and carry out the effect.
    ///
    /// `UseServer` replaces the draft with the server copy. `KeepLocal`
    /// resubmits the draft against the server's version; that save may
    /// itself conflict, in which case the dialog is shown again. `Cancel`
    /// leaves the draft and known version untouched.
    pub async fn resolve_conflict(&self, choice: Choice) -> Result<ResolverOutcome, SessionError> {
        self.ensure_open()?;
        let _guard = InFlightGuard::acquire(&self.handle.saving)
            .ok_or_else(|| SessionError::SaveInFlight(self.id.clone()))?;

        let (resolution, draft) = {
            let mut state = self.lock();
            if choice == Choice::KeepLocal && state.dialog.is_shown() {
                state.draft.validate()?;
            }
            let resolution = state.dialog.resolve(choice)?;
            (resolution, state.draft.clone())
        };

        let outcome = ConflictResolver::execute(self.backend.as_ref(), resolution, &draft)
            .await
            .map_err(|e| {
                warn!(id = %self.id, error = %e, "conflict resolution failed");
                e
            })?;

        match outcome {
            ResolverOutcome::Reloaded(ref doc) => {
                self.accept_outcome("reload")?;
                self.replace_all(doc);
            }
            ResolverOutcome::Resubmitted(ref save) => self.apply_save_outcome(save)?,
            ResolverOutcome::Cancelled => {
                debug!(id = %self.id, "conflict dismissed; draft kept");
            }
        }
        Ok(outcome)
    }

    /// Re-fetch the document, dropping unsaved edits and any pending
    /// conflict. Refused while a save is in flight, since its outcome would
    /// land on top of the re-fetched copy.
    pub async fn reload(&self) -> Result<WorkflowDocument, SessionError> {
        self.ensure_open()?;
        let _guard = InFlightGuard::acquire(&self.handle.saving)
            .ok_or_else(|| SessionError::SaveInFlight(self.id.clone()))?;
        let doc = self.backend.fetch(&self.id).await?;
        self.accept_outcome("reload")?;
        self.replace_all(&doc);
        info!(id = %self.id, version = doc.version, "reloaded workflow");
        Ok(doc)
    }

    // -- internals ----------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!(id = %self.id, "session state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.handle.is_open() {
            Ok(())
        } else {
            Err(SessionError::Closed(self.id.clone()))
        }
    }

    /// Outcomes that arrive after close are dropped.
    fn accept_outcome(&self, what: &str) -> Result<(), SessionError> {
        if self.handle.is_open() {
            return Ok(());
        }
        warn!(id = %self.id, outcome = what, "session closed before outcome arrived; dropping it");
        Err(SessionError::Closed(self.id.clone()))
    }

    fn apply_save_outcome(&self, outcome: &SaveOutcome) -> Result<(), SessionError> {
        let what = match outcome {
            SaveOutcome::Saved { .. } => "saved",
            SaveOutcome::Conflict { .. } => "conflict",
            SaveOutcome::Failed { .. } => "failed",
        };
        self.accept_outcome(what)?;

        let event = match outcome {
            SaveOutcome::Saved {
                new_version,
                document,
                ..
            } => {
                let mut state = self.lock();
                state.known_version = *new_version;
                adopt_server_fields(&mut state.draft, document);
                state.saved = (**document).clone();
                SessionEvent::Saved {
                    new_version: *new_version,
                }
            }
            SaveOutcome::Conflict { .. } => {
                let info = match outcome.conflict_info() {
                    Some(info) => info,
                    None => return Ok(()),
                };
                self.lock().dialog.show(info.clone())?;
                SessionEvent::Conflict(info)
            }
            SaveOutcome::Failed { reason } => SessionEvent::Failed {
                reason: reason.clone(),
            },
        };
        self.publish(event);
        Ok(())
    }

    fn replace_all(&self, doc: &WorkflowDocument) {
        let mut state = self.lock();
        state.draft = doc.clone();
        state.saved = doc.clone();
        state.known_version = doc.version;
        if state.dialog.is_shown() {
            // The draft now matches the server; the conflict no longer applies.
            let _ = state.dialog.cancel();
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for EditingSession {
    fn drop(&mut self) {
        self.handle.close();
    }
}

fn node_mut<'a>(
    draft: &'a mut WorkflowDocument,
    node_id: &str,
) -> Result<&'a mut Node, ValidationError> {
    draft
        .nodes
        .iter_mut()
        .find(|n| n.id == node_id)
        .ok_or_else(|| ValidationError::UnknownNode(node_id.to_string()))
}

fn same_content(a: &WorkflowDocument, b: &WorkflowDocument) -> bool {
    a.name == b.name
        && a.description == b.description
        && a.nodes == b.nodes
        && a.edges == b.edges
        && a.metadata == b.metadata
}

/// Copy store-assigned fields, keeping any edits made while the save ran.
fn adopt_server_fields(draft: &mut WorkflowDocument, server: &WorkflowDocument) {
    draft.version = server.version;
    draft.owner_id = server.owner_id.clone();
    draft.is_public = server.is_public;
    draft.share_token = server.share_token.clone();
    draft.created_at = server.created_at;
    draft.updated_at = server.updated_at;
    draft.last_modified_by = server.last_modified_by.clone();
    draft.update_logs = server.update_logs.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::db::Database;
    use crate::models::NodeType;

    async fn session() -> EditingSession {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let backend = Arc::new(LocalBackend::new(Arc::new(db), "alice"));
        EditingSession::create(backend, NewWorkflow::new("Flow"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_remove_node_drops_incident_edges() {
        let s = session().await;
        s.add_node(Node::new("a", NodeType::UserInput, "In")).unwrap();
        s.add_node(Node::new("b", NodeType::Agent, "Agent")).unwrap();
        s.add_node(Node::new("c", NodeType::FinalOutput, "Out")).unwrap();
        s.add_edge(Edge::new("ab", "a", "b")).unwrap();
        s.add_edge(Edge::new("bc", "b", "c")).unwrap();

        let removed = s.remove_node("b").unwrap();
        assert_eq!(removed.id, "b");
        let draft = s.draft();
        assert_eq!(draft.nodes.len(), 2);
        assert!(draft.edges.is_empty());
    }

    #[tokio::test]
    async fn test_edge_edits_are_checked() {
        let s = session().await;
        s.add_node(Node::new("a", NodeType::UserInput, "In")).unwrap();
        assert_eq!(
            s.add_edge(Edge::new("e", "a", "ghost")),
            Err(ValidationError::DanglingEdge {
                edge_id: "e".into(),
                node_id: "ghost".into()
            })
        );
        assert_eq!(
            s.add_node(Node::new("a", NodeType::Router, "Again")),
            Err(ValidationError::DuplicateNodeId("a".into()))
        );
        assert_eq!(
            s.remove_edge("missing"),
            Err(ValidationError::UnknownEdge("missing".into()))
        );
        assert_eq!(
            s.move_node("missing", 1.0, 1.0),
            Err(ValidationError::UnknownNode("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_dirty_tracking() {
        let s = session().await;
        assert!(!s.is_dirty());

        s.set_description("Draft");
        s.set_metadata("owner_team", Value::String("ml".into()));
        assert!(s.is_dirty());

        let outcome = s.save().await.unwrap();
        assert!(outcome.is_saved());
        assert!(!s.is_dirty());
        assert_eq!(s.known_version(), 2);
        assert_eq!(s.draft().version, 2);
    }

    #[tokio::test]
    async fn test_move_and_node_data() {
        let s = session().await;
        s.add_node(Node::new("a", NodeType::ApiCall, "Fetch")).unwrap();
        s.move_node("a", 120.0, 40.0).unwrap();
        s.set_node_data("a", "url", Value::String("https://example.com".into()))
            .unwrap();

        let draft = s.draft();
        let node = draft.node("a").unwrap();
        assert_eq!(node.position, Position::new(120.0, 40.0));
        assert_eq!(node.data["url"], "https://example.com");
        assert_eq!(node.label(), Some("Fetch"));
    }

    #[tokio::test]
    async fn test_closed_session_refuses_save() {
        let s = session().await;
        let handle = s.handle();
        assert!(handle.is_open());
        handle.close();
        assert!(matches!(s.save().await, Err(SessionError::Closed(_))));
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = InFlightGuard::acquire(&flag).unwrap();
            assert!(InFlightGuard::acquire(&flag).is_none());
        }
        assert!(InFlightGuard::acquire(&flag).is_some());
    }
}
