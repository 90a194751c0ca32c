#![warn(missing_docs)]
//! # oab-kiosk-remote
//!
//! ## Purpose
//! Defines the Remote Session API contract consumed by the session
//! lifecycle and ships its HTTP implementation.
//!
//! ## Responsibilities
//! - Expose authenticate/create/update/finalize/get as the
//!   [`RemoteSessionApi`] trait so the controller can be driven by fakes.
//! - Carry every failure as a [`TransportError`] and classify it by HTTP
//!   status into [`TransportErrorKind`].
//! - Enforce the base URL policy (HTTPS, loopback HTTP for development).
//!
//! ## Data flow
//! Controller -> [`RemoteSessionApi`] -> [`HttpRemoteSessionApi`] ->
//! `reqwest` -> backend JSON -> `oab_kiosk_core` wire types.
//!
//! ## Ownership and lifetimes
//! Request bodies are borrowed for the duration of one call; responses are
//! decoded into owned values.
//!
//! ## Error model
//! Construction failures return [`RemoteError`]. Call failures return
//! [`TransportError`], whose `status` is `None` when no HTTP response was
//! received.
//!
//! ## Security and privacy notes
//! Bearer tokens are attached per request and never logged. Request bodies
//! are not logged because the login body carries the security code.

use std::time::Duration;

use async_trait::async_trait;
use oab_kiosk_core::{
    AuthToken, LoginRequest, LoginResponse, RemoteSession, SessionCreate, SessionUpdate,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Login path, relative to the API base URL.
pub const LOGIN_PATH: &str = "/api/v1/auth/login/advogado";
/// Session collection path, relative to the API base URL.
pub const SESSIONS_PATH: &str = "/api/v1/sessoes";

/// Abstract Remote Session API.
#[async_trait]
pub trait RemoteSessionApi: Send + Sync {
    /// Exchanges credentials for a bearer token and identity fields.
    async fn authenticate(&self, request: &LoginRequest) -> Result<LoginResponse, TransportError>;

    /// Opens a remote session.
    async fn create_session(
        &self,
        token: &AuthToken,
        body: &SessionCreate,
    ) -> Result<RemoteSession, TransportError>;

    /// Applies a partial update to a remote session.
    async fn update_session(
        &self,
        token: &AuthToken,
        session_id: i64,
        body: &SessionUpdate,
    ) -> Result<RemoteSession, TransportError>;

    /// Closes a remote session on the backend.
    async fn finalize_session(
        &self,
        token: &AuthToken,
        session_id: i64,
    ) -> Result<RemoteSession, TransportError>;

    /// Fetches the current state of a remote session.
    async fn get_session(
        &self,
        token: &AuthToken,
        session_id: i64,
    ) -> Result<RemoteSession, TransportError>;
}

/// Status-based classification of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// HTTP 5xx.
    Server,
    /// No HTTP response (connection, DNS, timeout).
    Network,
    /// Any other status, including undecodable success bodies.
    Other,
}

/// Failure of one Remote Session API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// HTTP status, `None` when no response was received.
    pub status: Option<u16>,
    /// Backend `detail` field, when the error body carried one.
    pub detail: Option<String>,
    /// Human-readable summary.
    pub message: String,
}

impl TransportError {
    /// Failure without an HTTP response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            detail: None,
            message: message.into(),
        }
    }

    /// Non-success HTTP response.
    pub fn http(status: u16, detail: Option<String>) -> Self {
        let message = match &detail {
            Some(detail) => format!("http {status}: {detail}"),
            None => format!("http {status}"),
        };
        Self {
            status: Some(status),
            detail,
            message,
        }
    }

    /// Response that arrived but could not be decoded.
    pub fn invalid_response(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            detail: None,
            message: format!("invalid response body: {}", message.into()),
        }
    }

    /// Classifies the failure by status.
    pub fn kind(&self) -> TransportErrorKind {
        match self.status {
            None => TransportErrorKind::Network,
            Some(401) => TransportErrorKind::Unauthorized,
            Some(403) => TransportErrorKind::Forbidden,
            Some(404) => TransportErrorKind::NotFound,
            Some(500..=599) => TransportErrorKind::Server,
            Some(_) => TransportErrorKind::Other,
        }
    }

    /// Returns `true` for a 401 whose detail reports the session as no
    /// longer active on the backend.
    pub fn is_session_inactive(&self) -> bool {
        if self.kind() != TransportErrorKind::Unauthorized {
            return false;
        }
        let Some(detail) = &self.detail else {
            return false;
        };
        let detail = detail.to_lowercase();
        detail.contains("sessão não ativa") || detail.contains("autenticação negada")
    }
}

/// Validates the API base URL.
///
/// # Errors
/// Returns [`RemoteError::InvalidEndpoint`] for unparsable URLs, URLs with
/// query/fragment parts, and plain HTTP to non-loopback hosts.
pub fn validate_base_url(base_url: &str) -> Result<Url, RemoteError> {
    let parsed = Url::parse(base_url)
        .map_err(|error| RemoteError::InvalidEndpoint(format!("invalid api url: {error}")))?;

    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(RemoteError::InvalidEndpoint(
            "api url must not carry a query or fragment".to_string(),
        ));
    }

    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" if is_loopback(&parsed) => Ok(parsed),
        "http" => Err(RemoteError::InvalidEndpoint(
            "api url must use https outside loopback development hosts".to_string(),
        )),
        other => Err(RemoteError::InvalidEndpoint(format!(
            "unsupported api url scheme: {other}"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(address)) => address.is_loopback(),
        Some(url::Host::Ipv6(address)) => address.is_loopback(),
        None => false,
    }
}

/// `reqwest` implementation of [`RemoteSessionApi`].
#[derive(Debug, Clone)]
pub struct HttpRemoteSessionApi {
    base_url: String,
    client: Client,
}

impl HttpRemoteSessionApi {
    /// Creates a client for `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    /// Returns [`RemoteError::InvalidEndpoint`] when the URL violates the
    /// base URL policy and [`RemoteError::Client`] when the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let parsed = validate_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RemoteError::Client(error.to_string()))?;

        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Returns the normalized base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn session_url(&self, session_id: i64) -> String {
        self.url(&format!("{SESSIONS_PATH}/{session_id}"))
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, TransportError> {
        let response = request.send().await.map_err(|error| {
            debug!(stage = "remote", action = operation, "request failed before response");
            match error.status() {
                Some(status) => TransportError::http(status.as_u16(), None),
                None => TransportError::network(format!("{operation}: {error}")),
            }
        })?;
        decode(operation, response).await
    }
}

#[async_trait]
impl RemoteSessionApi for HttpRemoteSessionApi {
    async fn authenticate(&self, request: &LoginRequest) -> Result<LoginResponse, TransportError> {
        let builder = self.client.post(self.url(LOGIN_PATH)).json(request);
        self.execute("authenticate", builder).await
    }

    async fn create_session(
        &self,
        token: &AuthToken,
        body: &SessionCreate,
    ) -> Result<RemoteSession, TransportError> {
        let builder = self
            .client
            .post(self.url(SESSIONS_PATH))
            .bearer_auth(token.expose())
            .json(body);
        self.execute("create_session", builder).await
    }

    async fn update_session(
        &self,
        token: &AuthToken,
        session_id: i64,
        body: &SessionUpdate,
    ) -> Result<RemoteSession, TransportError> {
        let builder = self
            .client
            .put(self.session_url(session_id))
            .bearer_auth(token.expose())
            .json(body);
        self.execute("update_session", builder).await
    }

    async fn finalize_session(
        &self,
        token: &AuthToken,
        session_id: i64,
    ) -> Result<RemoteSession, TransportError> {
        let url = format!("{}/finalizar", self.session_url(session_id));
        let builder = self
            .client
            .post(url)
            .bearer_auth(token.expose())
            .json(&serde_json::json!({}));
        self.execute("finalize_session", builder).await
    }

    async fn get_session(
        &self,
        token: &AuthToken,
        session_id: i64,
    ) -> Result<RemoteSession, TransportError> {
        let builder = self
            .client
            .get(self.session_url(session_id))
            .bearer_auth(token.expose());
        self.execute("get_session", builder).await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> Result<T, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body);
        debug!(
            stage = "remote",
            action = operation,
            status = status.as_u16(),
            "request rejected"
        );
        return Err(TransportError::http(status.as_u16(), detail));
    }

    response
        .json::<T>()
        .await
        .map_err(|error| TransportError::invalid_response(status.as_u16(), error.to_string()))
}

/// Extracts the backend `detail` field; validation errors arrive as arrays
/// and are kept in their JSON form.
fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(detail) => Some(detail),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Errors raised while constructing a remote client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Base URL violates the endpoint policy.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// HTTP client construction failed.
    #[error("http client failure: {0}")]
    Client(String),
}
