//! REST client for the FlowSync API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::WorkflowBackend;
use crate::config::ClientConfig;
use crate::errors::BackendError;
use crate::models::{
    ConflictPayload, NewWorkflow, UpdateLog, WorkflowDocument, WorkflowExport, WorkflowUpdate,
};

/// Session-scoped credentials passed explicitly to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareResponse {
    pub share_token: String,
    pub is_public: bool,
}

/// Error body of every non-2xx response: `{"detail": ...}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Asynchronous client for `/api/v1`.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    api_url: String,
    credentials: Option<Credentials>,
}

impl HttpBackend {
    pub fn new(
        api_url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("flowsync/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        info!(api_url = %api_url, authenticated = credentials.is_some(), "created HttpBackend");
        Ok(Self {
            http,
            api_url,
            credentials,
        })
    }

    /// Build a client from the `[client]` config section, using the resolved
    /// token if there is one.
    pub fn from_config(config: &ClientConfig) -> Result<Self, BackendError> {
        Self::new(
            &config.api_url,
            config.token.as_deref().map(Credentials::bearer),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// A copy of this client using `credentials`.
    pub fn with_credentials(&self, credentials: Credentials) -> Self {
        Self {
            http: self.http.clone(),
            api_url: self.api_url.clone(),
            credentials: Some(credentials),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Exchange a username and password for a bearer token.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Credentials, BackendError> {
        let body = serde_json::json!({ "username": username, "password": password });
        let resp = self
            .http
            .post(format!("{}/auth/login", self.api_url))
            .json(&body)
            .send()
            .await?;
        let login: LoginResponse = decode(resp).await?;
        debug!(expires_at = %login.expires_at, "logged in");
        Ok(Credentials::bearer(login.access_token))
    }

    #[instrument(skip(self))]
    pub async fn list(&self, skip: u32, limit: u32) -> Result<Vec<WorkflowDocument>, BackendError> {
        let resp = self
            .request(Method::GET, "/workflows")
            .query(&[("skip", skip), ("limit", limit)])
            .send()
            .await?;
        let workflows: Vec<WorkflowDocument> = decode(resp).await?;
        debug!(count = workflows.len(), "fetched workflows");
        Ok(workflows)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let resp = self
            .request(Method::DELETE, &format!("/workflows/{}", id))
            .send()
            .await?;
        let _: serde_json::Value = decode(resp).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn share(&self, id: &str) -> Result<ShareResponse, BackendError> {
        let resp = self
            .request(Method::POST, &format!("/workflows/{}/share", id))
            .send()
            .await?;
        decode(resp).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_shared(&self, share_token: &str) -> Result<WorkflowDocument, BackendError> {
        let resp = self
            .http
            .get(format!("{}/workflows/shared/{}", self.api_url, share_token))
            .send()
            .await?;
        decode(resp).await
    }

    #[instrument(skip(self))]
    pub async fn export(&self, id: &str) -> Result<WorkflowExport, BackendError> {
        let resp = self
            .request(Method::GET, &format!("/workflows/{}/export", id))
            .send()
            .await?;
        decode(resp).await
    }

    #[instrument(skip(self))]
    pub async fn update_logs(&self, id: &str) -> Result<Vec<UpdateLog>, BackendError> {
        let resp = self
            .request(Method::GET, &format!("/workflows/{}/logs", id))
            .send()
            .await?;
        decode(resp).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}{}", self.api_url, path));
        match self.credentials {
            Some(ref creds) => req.bearer_auth(creds.token()),
            None => req,
        }
    }
}

#[async_trait]
impl WorkflowBackend for HttpBackend {
    #[instrument(skip(self, new), fields(name = %new.name))]
    async fn create(&self, new: &NewWorkflow) -> Result<WorkflowDocument, BackendError> {
        let resp = self
            .request(Method::POST, "/workflows")
            .json(new)
            .send()
            .await?;
        let doc: WorkflowDocument = decode(resp).await?;
        info!(id = %doc.id, version = doc.version, "created workflow");
        Ok(doc)
    }

    #[instrument(skip(self))]
    async fn fetch(&self, id: &str) -> Result<WorkflowDocument, BackendError> {
        let resp = self
            .request(Method::GET, &format!("/workflows/{}", id))
            .send()
            .await?;
        decode(resp).await
    }

    #[instrument(skip(self, update), fields(known_version = update.known_version))]
    async fn update(
        &self,
        id: &str,
        update: &WorkflowUpdate,
    ) -> Result<WorkflowDocument, BackendError> {
        let resp = self
            .request(Method::PUT, &format!("/workflows/{}", id))
            .json(update)
            .send()
            .await?;
        decode(resp).await
    }
}

/// Decode a success body, or turn the error body into a [`BackendError`].
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| BackendError::ParseError(e.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(error_for_status(status.as_u16(), &body))
}

fn error_for_status(status: u16, body: &str) -> BackendError {
    let detail = serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.detail);
    let detail_text = match detail {
        Some(serde_json::Value::String(ref s)) => s.clone(),
        _ => body.to_string(),
    };

    match status {
        409 => match detail.and_then(|d| serde_json::from_value::<ConflictPayload>(d).ok()) {
            Some(payload) => BackendError::Conflict(payload),
            None => BackendError::ApiError {
                status,
                body: detail_text,
            },
        },
        401 | 403 => BackendError::Unauthorized(detail_text),
        404 => BackendError::NotFound(detail_text),
        _ => BackendError::ApiError {
            status,
            body: detail_text,
        },
    }
}
