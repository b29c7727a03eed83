//! Domain model types used throughout FlowSync.
//!
//! These types are shared by the store, the backend clients, the editing
//! session and the web API, and double as the JSON wire format.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Canvas coordinates of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The kinds of node the editor palette offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    UserInput,
    Agent,
    VectorStore,
    KnowledgeBase,
    Mcp,
    ApiCall,
    Router,
    FinalOutput,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserInput => write!(f, "userinput"),
            Self::Agent => write!(f, "agent"),
            Self::VectorStore => write!(f, "vectorstore"),
            Self::KnowledgeBase => write!(f, "knowledgebase"),
            Self::Mcp => write!(f, "mcp"),
            Self::ApiCall => write!(f, "apicall"),
            Self::Router => write!(f, "router"),
            Self::FinalOutput => write!(f, "finaloutput"),
        }
    }
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the owning document.
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub position: Position,
    /// Free-form attributes; must contain a string `label`.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Node {
    /// Create a node at the origin with the given label.
    pub fn new(id: impl Into<String>, node_type: NodeType, label: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("label".into(), Value::String(label.into()));
        Self {
            id: id.into(),
            node_type,
            position: Position::default(),
            data,
        }
    }

    /// Builder-style position setter.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.data.get("label").and_then(Value::as_str)
    }
}

/// A directed connection between two nodes of the same document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: None,
        }
    }
}

/// Check node/edge identity and referential integrity of a graph.
pub fn validate_graph(nodes: &[Node], edges: &[Edge]) -> Result<(), ValidationError> {
    let mut node_ids = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
        if node.label().is_none() {
            return Err(ValidationError::MissingLabel(node.id.clone()));
        }
    }

    let mut edge_ids = HashSet::with_capacity(edges.len());
    for edge in edges {
        if !edge_ids.insert(edge.id.as_str()) {
            return Err(ValidationError::DuplicateEdgeId(edge.id.clone()));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(ValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Workflow document
// ---------------------------------------------------------------------------

/// One entry of a workflow's save history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLog {
    pub username: String,
    pub timestamp: DateTime<Utc>,
    pub version: i64,
}

/// A persisted workflow as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Assigned by the store; starts at 1 and grows by one per save.
    pub version: i64,
    pub owner_id: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub share_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_modified_by: Option<String>,
    #[serde(default)]
    pub update_logs: Vec<UpdateLog>,
}

impl WorkflowDocument {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        validate_graph(&self.nodes, &self.edges)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The portable form of this document, without store-assigned identity.
    pub fn export(&self) -> WorkflowExport {
        WorkflowExport {
            name: self.name.clone(),
            description: self.description.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            metadata: self.metadata.clone(),
            version: self.version,
            is_public: self.is_public,
            last_modified_by: self.last_modified_by.clone(),
            update_logs: self.update_logs.clone(),
        }
    }
}

/// Export format: a document minus id, owner and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExport {
    pub name: String,
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub metadata: Map<String, Value>,
    pub version: i64,
    pub is_public: bool,
    pub last_modified_by: Option<String>,
    pub update_logs: Vec<UpdateLog>,
}

/// Payload for creating a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        validate_graph(&self.nodes, &self.edges)
    }
}

/// Payload for updating a workflow. Absent fields are left unchanged; an
/// empty `description` clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<Edge>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// The version the client last observed.
    pub known_version: i64,
}

impl WorkflowUpdate {
    /// An update that only carries the version, changing nothing.
    pub fn empty(known_version: i64) -> Self {
        Self {
            name: None,
            description: None,
            nodes: None,
            edges: None,
            metadata: None,
            known_version,
        }
    }

    /// A full update carrying every editable field of `draft`. A draft
    /// without a description sends an empty one, so a cleared description
    /// is saved as cleared.
    pub fn from_draft(draft: &WorkflowDocument, known_version: i64) -> Self {
        Self {
            name: Some(draft.name.clone()),
            description: Some(draft.description.clone().unwrap_or_default()),
            nodes: Some(draft.nodes.clone()),
            edges: Some(draft.edges.clone()),
            metadata: Some(draft.metadata.clone()),
            known_version,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.nodes.is_none()
            && self.edges.is_none()
            && self.metadata.is_none()
    }

    /// Merge the present fields into `doc`. Version bookkeeping is left to
    /// the store.
    pub fn apply_to(&self, doc: &mut WorkflowDocument) {
        if let Some(ref name) = self.name {
            doc.name = name.clone();
        }
        if let Some(ref description) = self.description {
            doc.description = (!description.is_empty()).then(|| description.clone());
        }
        if let Some(ref nodes) = self.nodes {
            doc.nodes = nodes.clone();
        }
        if let Some(ref edges) = self.edges {
            doc.edges = edges.clone();
        }
        if let Some(ref metadata) = self.metadata {
            doc.metadata = metadata.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Wire form of a rejected update (the `detail` of a `409` response).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPayload {
    pub message: String,
    pub current_version: i64,
    pub your_version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
}

impl ConflictPayload {
    pub fn new(current_version: i64, your_version: i64, last_modified_by: Option<String>) -> Self {
        let message = match last_modified_by {
            Some(ref user) => format!(
                "Workflow was modified by {} (version {}) after you loaded version {}",
                user, current_version, your_version
            ),
            None => format!(
                "Workflow was modified (version {}) after you loaded version {}",
                current_version, your_version
            ),
        };
        Self {
            message,
            current_version,
            your_version,
            last_modified_by,
        }
    }
}

/// Transient description of a conflict shown to the user. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub message: String,
    pub current_version: i64,
    pub your_version: i64,
    pub last_modified_by: Option<String>,
}

impl From<ConflictPayload> for ConflictInfo {
    fn from(payload: ConflictPayload) -> Self {
        Self {
            message: payload.message,
            current_version: payload.current_version,
            your_version: payload.your_version,
            last_modified_by: payload.last_modified_by,
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A user account allowed to log in to the web API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> (Vec<Node>, Vec<Edge>) {
        let nodes = vec![
            Node::new("in", NodeType::UserInput, "Question"),
            Node::new("agent", NodeType::Agent, "Answerer").at(200.0, 0.0),
            Node::new("out", NodeType::FinalOutput, "Answer").at(400.0, 0.0),
        ];
        let edges = vec![Edge::new("e1", "in", "agent"), Edge::new("e2", "agent", "out")];
        (nodes, edges)
    }

    #[test]
    fn test_valid_graph() {
        let (nodes, edges) = graph();
        assert!(validate_graph(&nodes, &edges).is_ok());
    }

    #[test]
    fn test_duplicate_node_id() {
        let (mut nodes, edges) = graph();
        nodes.push(Node::new("in", NodeType::Router, "Again"));
        assert_eq!(
            validate_graph(&nodes, &edges),
            Err(ValidationError::DuplicateNodeId("in".into()))
        );
    }

    #[test]
    fn test_duplicate_edge_id() {
        let (nodes, mut edges) = graph();
        edges.push(Edge::new("e1", "in", "out"));
        assert_eq!(
            validate_graph(&nodes, &edges),
            Err(ValidationError::DuplicateEdgeId("e1".into()))
        );
    }

    #[test]
    fn test_dangling_edge() {
        let (nodes, mut edges) = graph();
        edges.push(Edge::new("e3", "agent", "ghost"));
        assert_eq!(
            validate_graph(&nodes, &edges),
            Err(ValidationError::DanglingEdge {
                edge_id: "e3".into(),
                node_id: "ghost".into(),
            })
        );
    }

    #[test]
    fn test_missing_label() {
        let (mut nodes, edges) = graph();
        nodes[1].data.remove("label");
        assert_eq!(
            validate_graph(&nodes, &edges),
            Err(ValidationError::MissingLabel("agent".into()))
        );
    }

    #[test]
    fn test_empty_name_rejected() {
        let new = NewWorkflow::new("   ");
        assert_eq!(new.validate(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_node_type_wire_names() {
        let node = Node::new("n1", NodeType::VectorStore, "Docs");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "vectorstore");
        assert_eq!(json["data"]["label"], "Docs");

        let bad = serde_json::json!({"id": "n2", "type": "spaceship", "data": {"label": "x"}});
        assert!(serde_json::from_value::<Node>(bad).is_err());
    }

    #[test]
    fn test_update_apply_only_present_fields() {
        let now = Utc::now();
        let (nodes, edges) = graph();
        let mut doc = WorkflowDocument {
            id: "wf".into(),
            name: "Original".into(),
            description: Some("Initial".into()),
            nodes,
            edges,
            metadata: Map::new(),
            version: 1,
            owner_id: "admin".into(),
            is_public: false,
            share_token: None,
            created_at: now,
            updated_at: now,
            last_modified_by: None,
            update_logs: Vec::new(),
        };

        let mut update = WorkflowUpdate::empty(1);
        assert!(update.is_empty());
        update.description = Some("Updated".into());
        update.apply_to(&mut doc);

        assert_eq!(doc.name, "Original");
        assert_eq!(doc.description.as_deref(), Some("Updated"));
        assert_eq!(doc.nodes.len(), 3);
    }

    #[test]
    fn test_empty_description_clears() {
        let now = Utc::now();
        let mut doc = WorkflowDocument {
            id: "wf".into(),
            name: "Flow".into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            metadata: Map::new(),
            version: 1,
            owner_id: "admin".into(),
            is_public: false,
            share_token: None,
            created_at: now,
            updated_at: now,
            last_modified_by: None,
            update_logs: Vec::new(),
        };

        // A draft without a description still says so explicitly.
        let update = WorkflowUpdate::from_draft(&doc, 1);
        assert_eq!(update.description.as_deref(), Some(""));

        doc.description = Some("Notes".into());
        update.apply_to(&mut doc);
        assert_eq!(doc.description, None);
    }

    #[test]
    fn test_update_serialization_omits_absent_fields() {
        let mut update = WorkflowUpdate::empty(4);
        update.name = Some("Renamed".into());
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "Renamed", "known_version": 4})
        );
    }

    #[test]
    fn test_conflict_payload_message() {
        let payload = ConflictPayload::new(5, 3, Some("alice".into()));
        assert!(payload.message.contains("alice"));
        let info: ConflictInfo = payload.into();
        assert_eq!(info.current_version, 5);
        assert_eq!(info.your_version, 3);
        assert_eq!(info.last_modified_by.as_deref(), Some("alice"));
    }
}
