#![warn(missing_docs)]
//! # oab-kiosk-ui
//!
//! ## Purpose
//! Defines the presentation-facing contracts and state projections for the
//! kiosk.
//!
//! ## Responsibilities
//! - Declare the [`Notifier`] and [`PresentationBridge`] collaborators.
//! - Carry the typed [`SessionStartPayload`] delivered on login.
//! - Project timer snapshots into an [`OverlayView`].
//! - Map error categories to user-facing [`UserMessage`]s.
//!
//! ## Data flow
//! Controller events -> bridge/notifier calls -> window shell; timer
//! snapshots -> [`OverlayView`] -> rendered countdown.
//!
//! ## Ownership and lifetimes
//! Views and messages own their strings so they can cross task and process
//! boundaries without borrowing controller state.
//!
//! ## Error model
//! This crate favors explicit state over recoverable errors. The only
//! fallible call is payload serialization.
//!
//! ## Security and privacy notes
//! Views and messages exclude tokens, security codes and passwords.

use async_trait::async_trait;
use oab_kiosk_auth::{AuthError, SessionCreationError};
use oab_kiosk_elevation::ElevationError;
use oab_kiosk_timer::TimerState;
use serde::{Deserialize, Serialize};

/// Title of the administrator-ended-session alert.
pub const SESSION_ENDED_TITLE: &str = "Sessão Encerrada";
/// Body of the administrator-ended-session alert.
pub const SESSION_ENDED_BY_ADMIN: &str = "Sua sessão foi encerrada pelo administrador.";

/// Typed payload handed to the window shell when a session view opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartPayload {
    /// Practitioner display name.
    pub user_name: String,
    /// OAB registration number.
    pub oab_number: String,
    /// Session length in seconds.
    pub total_seconds: u64,
}

impl SessionStartPayload {
    /// Serializes the payload for an inter-process channel.
    ///
    /// # Errors
    /// Returns the serializer error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Why the session view closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// User asked to log out.
    UserLogout,
    /// Countdown reached zero.
    Expired,
    /// Backend reported the session inactive.
    EndedRemotely,
}

/// One-way window transition requests; the implementor owns every window.
pub trait PresentationBridge: Send + Sync {
    /// Switch to the session view. Called once per successful login.
    fn on_login_succeeded(&self, payload: SessionStartPayload);
    /// Switch back to the login view.
    fn on_session_ended(&self, reason: SessionEndReason);
    /// The exit gate approved; the shell may terminate.
    fn on_exit_approved(&self);
}

/// How a message must be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// Non-blocking text near the form.
    Inline,
    /// Modal alert that must be acknowledged.
    Blocking,
}

/// User-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    /// Display mode.
    pub presentation: Presentation,
    /// Alert title.
    pub title: String,
    /// Message body.
    pub body: String,
}

impl UserMessage {
    /// Creates an inline message.
    pub fn inline(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            presentation: Presentation::Inline,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Creates a blocking message.
    pub fn blocking(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            presentation: Presentation::Blocking,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Message for a failed authentication.
    pub fn from_auth_error(error: &AuthError) -> Self {
        match error {
            AuthError::MalformedCredentials(_) => Self::inline(
                "Login",
                "Verifique o número de inscrição e o código de segurança.",
            ),
            AuthError::InvalidCredentials => {
                Self::inline("Login", "Credenciais inválidas. Tente novamente.")
            }
            AuthError::NotEligible => Self::inline(
                "Login",
                "Inscrição sem permissão para utilizar este terminal.",
            ),
            AuthError::Network(_) => {
                Self::inline("Login", "Erro ao autenticar. Verifique sua conexão.")
            }
            AuthError::Server { .. } | AuthError::InvalidResponse(_) => Self::inline(
                "Login",
                "Erro ao autenticar. Tente novamente em instantes.",
            ),
        }
    }

    /// Blocking alert for a failed session creation.
    pub fn from_session_creation_error(error: &SessionCreationError) -> Self {
        let status = error
            .status()
            .map(|status| format!(" (HTTP {status})"))
            .unwrap_or_default();
        if error.is_config_problem() {
            return Self::blocking(
                "Configuração da sessão",
                format!(
                    "Não foi possível iniciar a sessão: verifique o computador e o administrador configurados{status}."
                ),
            );
        }
        Self::blocking(
            "Falha no servidor",
            format!("Não foi possível iniciar a sessão no servidor{status}. Tente novamente."),
        )
    }

    /// Message for a refused exit request.
    pub fn from_elevation_error(error: &ElevationError) -> Self {
        match error {
            ElevationError::PasswordMismatch => Self::inline("Sair", "Senha inválida."),
            ElevationError::ConsentDenied => {
                Self::inline("Sair", "Permissão de administrador negada.")
            }
            ElevationError::InvalidDigest(_) | ElevationError::InvalidCommand(_) => {
                Self::blocking("Sair", "Saída indisponível: configuração de administrador inválida.")
            }
        }
    }

    /// Blocking alert shown when the backend ended the session.
    pub fn session_ended_by_administrator() -> Self {
        Self::blocking(SESSION_ENDED_TITLE, SESSION_ENDED_BY_ADMIN)
    }

    /// Warning for a minutes-remaining threshold.
    pub fn threshold(minutes_remaining: u64) -> Self {
        let body = if minutes_remaining == 1 {
            "Resta 1 minuto para o fim da sessão.".to_string()
        } else {
            format!("Restam {minutes_remaining} minutos para o fim da sessão.")
        };
        Self::inline("Tempo de sessão", body)
    }

    /// Notice shown when the countdown expires.
    pub fn session_expired() -> Self {
        Self::blocking(SESSION_ENDED_TITLE, "O tempo da sua sessão terminou.")
    }
}

/// Native notification collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification; delivery failures are the implementor's
    /// concern.
    async fn notify(&self, message: UserMessage);
}

/// Countdown overlay projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayView {
    /// Whether the overlay is visible.
    pub active: bool,
    /// Holder's display name.
    pub name: String,
    /// Holder's registration number.
    pub registration_id: String,
    /// Remaining time as `MM:SS`.
    pub remaining: String,
}

impl OverlayView {
    /// Projects a timer snapshot.
    pub fn from_state(state: &TimerState) -> Self {
        let (name, registration_id) = state
            .holder
            .as_ref()
            .map(|holder| (holder.name.clone(), holder.id.clone()))
            .unwrap_or_default();
        Self {
            active: state.is_active,
            name,
            registration_id,
            remaining: format_remaining(state.remaining_seconds),
        }
    }

    /// Hidden overlay.
    pub fn hidden() -> Self {
        Self::from_state(&TimerState::default())
    }
}

/// Formats seconds as zero-padded `MM:SS`; minutes are not wrapped at 60.
pub fn format_remaining(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Screen the kiosk is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KioskScreen {
    /// Login form.
    Login,
    /// Session view with the overlay.
    Session,
}

/// Aggregate presentation state for a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiState {
    /// App version string sourced from root `VERSION`.
    pub version: String,
    /// Current screen.
    pub screen: KioskScreen,
    /// Last payload received on login.
    pub session: Option<SessionStartPayload>,
    /// Overlay projection.
    pub overlay: OverlayView,
    /// Message awaiting display.
    pub message: Option<UserMessage>,
}

impl UiState {
    /// Creates login-screen state.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            screen: KioskScreen::Login,
            session: None,
            overlay: OverlayView::hidden(),
            message: None,
        }
    }

    /// Enters the session view.
    pub fn apply_login(&mut self, payload: SessionStartPayload) {
        self.overlay = OverlayView {
            active: true,
            name: payload.user_name.clone(),
            registration_id: payload.oab_number.clone(),
            remaining: format_remaining(payload.total_seconds),
        };
        self.session = Some(payload);
        self.screen = KioskScreen::Session;
        self.message = None;
    }

    /// Returns to the login view.
    ///
    /// A remote end queues no message: the [`Notifier`] already raised the
    /// administrator alert for it.
    pub fn apply_session_ended(&mut self, reason: SessionEndReason) {
        self.screen = KioskScreen::Login;
        self.session = None;
        self.overlay = OverlayView::hidden();
        self.message = match reason {
            SessionEndReason::Expired => Some(UserMessage::session_expired()),
            SessionEndReason::EndedRemotely | SessionEndReason::UserLogout => None,
        };
    }

    /// Refreshes the overlay from a timer snapshot while in session.
    pub fn apply_timer(&mut self, state: &TimerState) {
        if self.screen == KioskScreen::Session {
            self.overlay = OverlayView::from_state(state);
        }
    }

    /// Queues a message for display.
    pub fn show_message(&mut self, message: UserMessage) {
        self.message = Some(message);
    }

    /// Removes and returns the pending message.
    pub fn take_message(&mut self) -> Option<UserMessage> {
        self.message.take()
    }
}
