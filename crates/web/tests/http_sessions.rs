//! Editing-session scenarios over HTTP.
//!
//! Each test starts the real axum server on an ephemeral port over an
//! in-memory database and drives it with `HttpBackend` sessions. Live
//! updates are read with a small WebSocket client speaking the upgrade
//! handshake over a plain TCP stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flowsync_core::backend::{HttpBackend, WorkflowBackend};
use flowsync_core::config::AppConfig;
use flowsync_core::conflict::{Choice, ResolverOutcome, SaveOutcome};
use flowsync_core::db::Database;
use flowsync_core::errors::BackendError;
use flowsync_core::models::{NewWorkflow, Node, NodeType, WorkflowUpdate};
use flowsync_core::session::EditingSession;
use flowsync_web::WebServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// ===========================================================================
// Helpers
// ===========================================================================

struct TestServer {
    addr: SocketAddr,
    db: Arc<Database>,
}

impl TestServer {
    async fn start(require_auth: bool, users: &[(&str, &str)]) -> Self {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        for (name, password) in users {
            db.create_user(name, password, false).unwrap();
        }
        let db = Arc::new(db);

        let mut config = AppConfig::default();
        config.web.require_auth = require_auth;

        let listener = WebServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = WebServer::new(config, db.clone());
        tokio::spawn(server.serve(listener, std::future::pending()));

        Self { addr, db }
    }

    fn api_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    fn anonymous(&self) -> HttpBackend {
        HttpBackend::new(self.api_url(), None, Duration::from_secs(10)).unwrap()
    }

    async fn login(&self, username: &str, password: &str) -> HttpBackend {
        let client = self.anonymous();
        let creds = client.login(username, password).await.unwrap();
        client.with_credentials(creds)
    }
}

/// Client end of `/api/v1/ws`.
struct LiveFeed {
    stream: TcpStream,
}

impl LiveFeed {
    /// Send the upgrade request with `query` and return the response status
    /// code together with the open stream.
    async fn connect(addr: SocketAddr, query: &str) -> (u16, Self) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET /api/v1/ws?{} HTTP/1.1\r\n\
             Host: {}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            query, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(stream.read_u8().await.unwrap());
        }
        let head = String::from_utf8(head).unwrap();
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap();
        (status, Self { stream })
    }

    /// Next text message as JSON. Server frames are unmasked; control
    /// frames other than close are skipped.
    async fn next_message(&mut self) -> serde_json::Value {
        loop {
            let opcode = self.stream.read_u8().await.unwrap() & 0x0f;
            let len = match self.stream.read_u8().await.unwrap() & 0x7f {
                126 => u64::from(self.stream.read_u16().await.unwrap()),
                127 => self.stream.read_u64().await.unwrap(),
                n => u64::from(n),
            };
            let mut payload = vec![0u8; len as usize];
            self.stream.read_exact(&mut payload).await.unwrap();
            match opcode {
                0x1 => return serde_json::from_slice(&payload).unwrap(),
                0x8 => panic!("live feed closed by server"),
                _ => continue,
            }
        }
    }

    async fn expect_message(&mut self) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(5), self.next_message())
            .await
            .expect("no live update within 5s")
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn test_health_is_public() {
    let server = TestServer::start(true, &[]).await;
    let resp = reqwest::get(format!("{}/health", server.api_url()))
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_login_response_shape() {
    let server = TestServer::start(true, &[("alice", "wonderland")]).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/auth/login", server.api_url()))
        .json(&serde_json::json!({"username": "alice", "password": "wonderland"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["access_token"].is_string());
    assert_eq!(body["token_type"], "bearer");
    assert!(body["expires_at"].is_string());
}

#[tokio::test]
async fn test_bad_credentials_and_missing_token() {
    let server = TestServer::start(true, &[("alice", "wonderland")]).await;
    let client = server.anonymous();

    assert!(matches!(
        client.login("alice", "wrong").await,
        Err(BackendError::Unauthorized(_))
    ));
    assert!(matches!(
        client.list(0, 10).await,
        Err(BackendError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_description_survives_save_and_reload() {
    let server = TestServer::start(true, &[("alice", "wonderland")]).await;
    let alice: Arc<dyn WorkflowBackend> = Arc::new(server.login("alice", "wonderland").await);

    let session = EditingSession::create(
        alice.clone(),
        NewWorkflow::new("Flow").with_description("Initial"),
    )
    .await
    .unwrap();
    assert_eq!(session.known_version(), 1);

    session.set_description("Updated");
    assert!(session.save().await.unwrap().is_saved());

    let reloaded = session.reload().await.unwrap();
    assert_eq!(reloaded.description.as_deref(), Some("Updated"));
    assert_eq!(reloaded.version, 2);
    assert_eq!(reloaded.last_modified_by.as_deref(), Some("alice"));

    // Repeated GETs with no edits in between are identical.
    let first = alice.fetch(session.id()).await.unwrap();
    let second = alice.fetch(session.id()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_conflict_then_keep_local() {
    let server =
        TestServer::start(true, &[("alice", "wonderland"), ("bob", "builder")]).await;
    let alice: Arc<dyn WorkflowBackend> = Arc::new(server.login("alice", "wonderland").await);
    let bob: Arc<dyn WorkflowBackend> = Arc::new(server.login("bob", "builder").await);

    let a = EditingSession::create(alice, NewWorkflow::new("Shared flow"))
        .await
        .unwrap();
    let b = EditingSession::open(bob, a.id()).await.unwrap();

    a.set_description("Alice's");
    assert!(a.save().await.unwrap().is_saved());

    b.set_description("Bob's");
    match b.save().await.unwrap() {
        SaveOutcome::Conflict {
            current_version,
            your_version,
            last_modified_by,
            ..
        } => {
            assert_eq!(current_version, 2);
            assert_eq!(your_version, 1);
            assert_eq!(last_modified_by.as_deref(), Some("alice"));
        }
        other => panic!("expected Conflict, got {:?}", other),
    }

    match b.resolve_conflict(Choice::KeepLocal).await.unwrap() {
        ResolverOutcome::Resubmitted(SaveOutcome::Saved { new_version, .. }) => {
            assert_eq!(new_version, 3)
        }
        other => panic!("expected a saved resubmit, got {:?}", other),
    }

    let stored = server.db.get_workflow_entry(a.id()).unwrap();
    assert_eq!(stored.description.as_deref(), Some("Bob's"));
    assert_eq!(stored.version, 3);
}

#[tokio::test]
async fn test_conflict_then_use_server() {
    let server =
        TestServer::start(true, &[("alice", "wonderland"), ("bob", "builder")]).await;
    let alice: Arc<dyn WorkflowBackend> = Arc::new(server.login("alice", "wonderland").await);
    let bob: Arc<dyn WorkflowBackend> = Arc::new(server.login("bob", "builder").await);

    let a = EditingSession::create(alice, NewWorkflow::new("Shared flow"))
        .await
        .unwrap();
    let b = EditingSession::open(bob, a.id()).await.unwrap();

    a.add_node(Node::new("agent", NodeType::Agent, "Planner"))
        .unwrap();
    a.save().await.unwrap();

    b.set_name("Bob's rename");
    assert!(b.save().await.unwrap().is_conflict());
    b.resolve_conflict(Choice::UseServer).await.unwrap();

    let draft = b.draft();
    assert_eq!(draft.version, 2);
    assert_eq!(draft.name, "Shared flow");
    assert!(draft.node("agent").is_some());
    assert!(!b.is_dirty());
}

#[tokio::test]
async fn test_invalid_update_is_unprocessable() {
    let server = TestServer::start(true, &[("alice", "wonderland")]).await;
    let alice = server.login("alice", "wonderland").await;

    let doc = alice.create(&NewWorkflow::new("Flow")).await.unwrap();
    let mut update = WorkflowUpdate::empty(doc.version);
    update.name = Some("  ".into());

    assert!(matches!(
        alice.update(&doc.id, &update).await,
        Err(BackendError::ApiError { status: 422, .. })
    ));
    assert_eq!(server.db.get_workflow_entry(&doc.id).unwrap().version, 1);
}

#[tokio::test]
async fn test_share_export_and_logs() {
    let server = TestServer::start(true, &[("alice", "wonderland")]).await;
    let alice = server.login("alice", "wonderland").await;

    let doc = alice
        .create(&NewWorkflow::new("Public flow").with_description("Look"))
        .await
        .unwrap();

    let shared = alice.share(&doc.id).await.unwrap();
    assert!(shared.is_public);
    // Sharing again reuses the token.
    assert_eq!(alice.share(&doc.id).await.unwrap().share_token, shared.share_token);

    let public = server
        .anonymous()
        .fetch_shared(&shared.share_token)
        .await
        .unwrap();
    assert_eq!(public.id, doc.id);
    assert_eq!(public.version, 1);

    let export = alice.export(&doc.id).await.unwrap();
    assert_eq!(export.name, "Public flow");
    assert_eq!(export.description.as_deref(), Some("Look"));

    let logs = alice.update_logs(&doc.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].username, "alice");
    assert_eq!(logs[0].version, 1);

    alice.delete(&doc.id).await.unwrap();
    assert!(matches!(
        alice.fetch(&doc.id).await,
        Err(BackendError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_anonymous_mode_without_users() {
    let server = TestServer::start(false, &[]).await;
    let client = server.anonymous();

    let doc = client.create(&NewWorkflow::new("Scratch")).await.unwrap();
    assert_eq!(doc.owner_id, "anonymous");
    assert_eq!(client.list(0, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_live_feed_requires_token() {
    let server = TestServer::start(true, &[("alice", "wonderland")]).await;

    let (status, _) = LiveFeed::connect(server.addr, "").await;
    assert_eq!(status, 401);
    let (status, _) = LiveFeed::connect(server.addr, "token=not-a-session").await;
    assert_eq!(status, 401);

    let creds = server.anonymous().login("alice", "wonderland").await.unwrap();
    let (status, mut feed) =
        LiveFeed::connect(server.addr, &format!("token={}", creds.token())).await;
    assert_eq!(status, 101);
    assert_eq!(feed.expect_message().await["type"], "connected");
}

#[tokio::test]
async fn test_put_pushes_workflow_saved() {
    let server = TestServer::start(true, &[("alice", "wonderland")]).await;
    let creds = server.anonymous().login("alice", "wonderland").await.unwrap();
    let alice = server.anonymous().with_credentials(creds.clone());
    let doc = alice.create(&NewWorkflow::new("Flow")).await.unwrap();

    let query = format!("token={}&workflow_id={}", creds.token(), doc.id);
    let (status, mut feed) = LiveFeed::connect(server.addr, &query).await;
    assert_eq!(status, 101);
    let welcome = feed.expect_message().await;
    assert_eq!(welcome["type"], "connected");
    assert_eq!(welcome["workflow_id"], doc.id.as_str());

    let mut rename = WorkflowUpdate::empty(1);
    rename.name = Some("Renamed".into());
    assert_eq!(alice.update(&doc.id, &rename).await.unwrap().version, 2);

    let saved = feed.expect_message().await;
    assert_eq!(saved["type"], "workflow_saved");
    assert_eq!(saved["workflow_id"], doc.id.as_str());
    assert_eq!(saved["version"], 2);
    assert_eq!(saved["modified_by"], "alice");

    // An empty PUT changes nothing and pushes nothing; saves of other
    // workflows are filtered out.
    let unchanged = alice.update(&doc.id, &WorkflowUpdate::empty(2)).await.unwrap();
    assert_eq!(unchanged.version, 2);
    alice.create(&NewWorkflow::new("Other")).await.unwrap();

    let mut describe = WorkflowUpdate::empty(2);
    describe.description = Some("Notes".into());
    assert_eq!(alice.update(&doc.id, &describe).await.unwrap().version, 3);

    let next = feed.expect_message().await;
    assert_eq!(next["type"], "workflow_saved");
    assert_eq!(next["workflow_id"], doc.id.as_str());
    assert_eq!(next["version"], 3);
}
