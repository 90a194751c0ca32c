#![warn(missing_docs)]
//! # oab-kiosk-auth
//!
//! ## Purpose
//! Implements authentication primitives and the session lifecycle state
//! machine for `oab-kiosk`.
//!
//! ## Responsibilities
//! - Validate credential shape before any network call.
//! - Execute login through the injectable [`RemoteSessionApi`] and map
//!   transport failures into [`AuthError`].
//! - Classify session creation and validity-poll failures
//!   ([`SessionCreationError`], [`SessionPollError`]).
//! - Model the legal lifecycle transitions in [`LifecycleMachine`].
//!
//! ## Data flow
//! Form input -> [`validate_credentials`] -> [`AuthClient::login`] ->
//! [`AuthenticatedUser`] -> controller opens the remote session and drives
//! [`LifecycleMachine`].
//!
//! ## Ownership and lifetimes
//! The client holds a shared `Arc<dyn RemoteSessionApi>`; results are owned
//! so they can be moved into long-lived controller state.
//!
//! ## Error model
//! Every error enum exposes the underlying HTTP status where one exists so
//! user-facing alerts can name the category.
//!
//! ## Security and privacy notes
//! This crate does not log credentials or token values.
//!
//! ## Example
//! ```rust
//! use oab_kiosk_auth::{LifecycleMachine, LifecycleState};
//!
//! let machine = LifecycleMachine::new();
//! assert_eq!(machine.state(), LifecycleState::LoggedOut);
//! ```

use std::fmt;
use std::sync::Arc;

use oab_kiosk_core::{AuthToken, Credentials, LoginRequest, UserIdentity};
use oab_kiosk_remote::{RemoteSessionApi, TransportError, TransportErrorKind};
use thiserror::Error;
use tracing::{info, warn};

/// Maximum registration number length accepted by the login form.
pub const MAX_REGISTRATION_DIGITS: usize = 10;
/// Accepted security code length range.
pub const SECURITY_CODE_LEN: std::ops::RangeInclusive<usize> = 4..=8;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No session; the login view is shown.
    LoggedOut,
    /// Credentials are being checked by the backend.
    Authenticating,
    /// Authenticated, remote session not yet confirmed.
    SessionPending,
    /// Remote session confirmed and countdown running.
    SessionActive,
    /// Session is being torn down (expiry, logout or remote end).
    Expiring,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LoggedOut => "logged_out",
            Self::Authenticating => "authenticating",
            Self::SessionPending => "session_pending",
            Self::SessionActive => "session_active",
            Self::Expiring => "expiring",
        };
        f.write_str(label)
    }
}

/// Lifecycle state machine with explicit legal transitions.
#[derive(Debug, Clone)]
pub struct LifecycleMachine {
    state: LifecycleState,
}

impl LifecycleMachine {
    /// Creates a machine in `LoggedOut`.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::LoggedOut,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Claims the machine for a login attempt.
    ///
    /// # Errors
    /// Returns [`LifecycleError::LoginInFlight`] while another login is
    /// running and [`LifecycleError::SessionOpen`] while a session is live.
    pub fn begin_login(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::LoggedOut => {
                self.state = LifecycleState::Authenticating;
                Ok(())
            }
            LifecycleState::Authenticating | LifecycleState::SessionPending => {
                Err(LifecycleError::LoginInFlight)
            }
            LifecycleState::SessionActive | LifecycleState::Expiring => {
                Err(LifecycleError::SessionOpen)
            }
        }
    }

    /// `Authenticating -> SessionPending`.
    pub fn on_authenticated(&mut self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Authenticating, LifecycleState::SessionPending)
    }

    /// `SessionPending -> SessionActive`.
    pub fn on_session_started(&mut self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::SessionPending, LifecycleState::SessionActive)
    }

    /// `SessionActive -> Expiring`.
    pub fn begin_expiry(&mut self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::SessionActive, LifecycleState::Expiring)
    }

    /// Returns to `LoggedOut` from any state.
    pub fn logout(&mut self) {
        self.state = LifecycleState::LoggedOut;
    }

    /// Returns `true` while a remote session is live.
    pub fn has_session(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::SessionActive | LifecycleState::Expiring
        )
    }

    fn transition(
        &mut self,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), LifecycleError> {
        if self.state != from {
            return Err(LifecycleError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Token and identity returned by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Bearer token for subsequent calls.
    pub token: AuthToken,
    /// Identity derived from the login response.
    pub identity: UserIdentity,
}

/// Login client over the Remote Session API.
#[derive(Clone)]
pub struct AuthClient {
    api: Arc<dyn RemoteSessionApi>,
}

impl AuthClient {
    /// Creates a client.
    pub fn new(api: Arc<dyn RemoteSessionApi>) -> Self {
        Self { api }
    }

    /// Validates credentials and exchanges them for a token.
    ///
    /// # Errors
    /// Returns [`AuthError::MalformedCredentials`] without a network call
    /// when the shape check fails, otherwise the mapped transport failure.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthenticatedUser, AuthError> {
        validate_credentials(credentials)?;

        let response = self
            .api
            .authenticate(&LoginRequest::from(credentials))
            .await
            .map_err(|error| {
                let mapped = AuthError::from_transport(&error);
                warn!(stage = "auth", action = "login_failed", reason = %mapped);
                mapped
            })?;

        if response.access_token.trim().is_empty() {
            return Err(AuthError::InvalidResponse(
                "response missing access token".to_string(),
            ));
        }
        if response.usuario_id <= 0 {
            return Err(AuthError::InvalidResponse(
                "response missing user id".to_string(),
            ));
        }

        let identity = response.identity(&credentials.registration_id);
        info!(
            stage = "auth",
            action = "login_success",
            user_id = identity.user_id
        );
        Ok(AuthenticatedUser {
            token: AuthToken::new(response.access_token),
            identity,
        })
    }
}

/// Checks the login form shape: a numeric registration of up to
/// [`MAX_REGISTRATION_DIGITS`] digits and a security code whose length is in
/// [`SECURITY_CODE_LEN`].
///
/// # Errors
/// Returns [`AuthError::MalformedCredentials`] naming the failing field.
pub fn validate_credentials(credentials: &Credentials) -> Result<(), AuthError> {
    let registration = credentials.registration_id.trim();
    if registration.is_empty()
        || registration.len() > MAX_REGISTRATION_DIGITS
        || !registration.bytes().all(|byte| byte.is_ascii_digit())
    {
        return Err(AuthError::MalformedCredentials(
            "registration number must have 1 to 10 digits".to_string(),
        ));
    }

    let code_len = credentials.security_code.trim().chars().count();
    if !SECURITY_CODE_LEN.contains(&code_len) {
        return Err(AuthError::MalformedCredentials(
            "security code must have 4 to 8 characters".to_string(),
        ));
    }

    Ok(())
}

/// Authentication failures surfaced to the login form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Input failed the shape check.
    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),
    /// Backend rejected the credentials (401).
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Practitioner is not eligible to log in (403).
    #[error("practitioner not eligible")]
    NotEligible,
    /// No response from the backend.
    #[error("network failure: {0}")]
    Network(String),
    /// Any other backend failure.
    #[error("server failure ({status:?}): {message}")]
    Server {
        /// HTTP status, when one was received.
        status: Option<u16>,
        /// Transport summary.
        message: String,
    },
    /// Successful response violated the contract.
    #[error("invalid auth response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// Maps a transport failure of the authenticate call.
    pub fn from_transport(error: &TransportError) -> Self {
        match error.kind() {
            TransportErrorKind::Unauthorized => Self::InvalidCredentials,
            TransportErrorKind::Forbidden => Self::NotEligible,
            TransportErrorKind::Network => Self::Network(error.message.clone()),
            _ => Self::Server {
                status: error.status,
                message: error.message.clone(),
            },
        }
    }
}

/// Remote session creation failures; any of them rolls back the login.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionCreationError {
    /// Station configuration is missing or rejected by the backend.
    #[error("session config invalid ({status:?}): {message}")]
    ConfigInvalid {
        /// HTTP status, `None` when rejected locally.
        status: Option<u16>,
        /// Reason.
        message: String,
    },
    /// Token rejected while creating the session (401).
    #[error("unauthorized to create session")]
    Unauthorized,
    /// Token lacks permission to create the session (403).
    #[error("forbidden to create session")]
    Forbidden,
    /// Backend failure.
    #[error("server failure ({status:?}): {message}")]
    Server {
        /// HTTP status.
        status: Option<u16>,
        /// Transport summary.
        message: String,
    },
    /// No response from the backend.
    #[error("network failure: {0}")]
    Network(String),
}

impl SessionCreationError {
    /// Local configuration failure, detected before any request.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            status: None,
            message: message.into(),
        }
    }

    /// Maps a transport failure of the create call.
    pub fn from_transport(error: &TransportError) -> Self {
        match (error.kind(), error.status) {
            (TransportErrorKind::Unauthorized, _) => Self::Unauthorized,
            (TransportErrorKind::Forbidden, _) => Self::Forbidden,
            (TransportErrorKind::Network, _) => Self::Network(error.message.clone()),
            // Unknown station/administrator ids and payload validation.
            (TransportErrorKind::NotFound, status) | (_, status @ Some(400 | 422)) => {
                Self::ConfigInvalid {
                    status,
                    message: error.detail.clone().unwrap_or_else(|| error.message.clone()),
                }
            }
            (_, status) => Self::Server {
                status,
                message: error.message.clone(),
            },
        }
    }

    /// Returns the HTTP status behind this failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ConfigInvalid { status, .. } | Self::Server { status, .. } => *status,
            Self::Unauthorized => Some(401),
            Self::Forbidden => Some(403),
            Self::Network(_) => None,
        }
    }

    /// Returns `true` when the operator must fix the station configuration.
    pub fn is_config_problem(&self) -> bool {
        matches!(self, Self::ConfigInvalid { .. })
    }
}

/// Validity-poll failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionPollError {
    /// Session no longer exists (404); treated as already terminated.
    #[error("session not found")]
    NotFound,
    /// Backend rejected the token because the session was deactivated.
    #[error("session deactivated: {0}")]
    Deactivated(String),
    /// Any other failure; polling continues.
    #[error("transient poll failure: {0}")]
    Transient(TransportError),
}

impl SessionPollError {
    /// Maps a transport failure of the get call.
    pub fn from_transport(error: TransportError) -> Self {
        if error.is_session_inactive() {
            return Self::Deactivated(error.detail.unwrap_or(error.message));
        }
        match error.kind() {
            TransportErrorKind::NotFound => Self::NotFound,
            _ => Self::Transient(error),
        }
    }
}

/// Illegal lifecycle transition attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// A login is already running.
    #[error("a login is already in progress")]
    LoginInFlight,
    /// A session is already open.
    #[error("a session is already open")]
    SessionOpen,
    /// Transition not allowed from the current state.
    #[error("illegal lifecycle transition from {from} to {to}")]
    IllegalTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
}
