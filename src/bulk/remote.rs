//! Transport to the remote rule service.

use async_trait::async_trait;
use thiserror::Error;

use crate::rules::ValidationError;

/// Header carrying the tenant identifier on every rule service call.
pub const TENANT_HEADER: &str = "X-User-ID";

/// Failure of a single remote rule call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The call never reached the service or never completed.
    #[error("{0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("Error {status}: {body}")]
    Status { status: u16, body: String },

    /// The operation was malformed and was not sent.
    #[error("Invalid operation: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A fully resolved call against the rule service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    /// Path relative to the service base URL.
    pub path: String,
    /// Value of the tenant header.
    pub customer_id: String,
    /// JSON body, absent for deletes.
    pub body: Option<serde_json::Value>,
}

/// Raw response of the rule service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

impl RemoteResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The downstream rule API.
///
/// Implementations perform exactly one call per `send` and never retry.
#[async_trait]
pub trait RemoteRuleService: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError>;
}

/// `RemoteRuleService` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRuleService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRuleService {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl RemoteRuleService for HttpRuleService {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let url = self.url(&request.path);
        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .header(TENANT_HEADER, &request.customer_id);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(RemoteResponse { status, body })
    }
}
