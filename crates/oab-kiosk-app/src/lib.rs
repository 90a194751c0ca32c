#![warn(missing_docs)]
//! # oab-kiosk-app
//!
//! ## Purpose
//! Orchestrates authentication, remote session tracking, the countdown and
//! the exit gate for the `oab-kiosk` shell.
//!
//! ## Responsibilities
//! - Drive the login/logout lifecycle ([`SessionController`]).
//! - Poll the backend for remote deactivation without overlapping requests.
//! - Load runtime configuration from the environment ([`AppConfig`]).
//! - Set up per-run file logging and redact secrets from log details.
//! - Parse console shell commands ([`ConsoleCommand`]) and run the console
//!   loop until the exit gate approves ([`run_console`]).
//!
//! ## Data flow
//! Credentials -> auth client -> remote session creation -> session vault ->
//! countdown + validity poller -> presentation bridge. Expiry, logout and
//! remote deactivation converge through one teardown path back to the login
//! view.
//!
//! ## Ownership and lifetimes
//! The controller is a cheap `Arc` handle. Its lifecycle state sits behind a
//! std mutex that is never held across an `.await`; the timer pump and the
//! poller own clones of the handle for as long as their session lives.
//!
//! ## Error model
//! Login failures surface as [`LoginError`]; teardown failures are logged and
//! never block local convergence to `LoggedOut`. Start-up failures are
//! wrapped in [`AppError`].
//!
//! ## Security and privacy notes
//! - Tokens, security codes and passwords never reach the log.
//! - The bearer token stays in memory and in the session vault only while a
//!   session is live.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use oab_kiosk_auth::{
    AuthClient, AuthError, LifecycleError, LifecycleMachine, LifecycleState, SessionCreationError,
    SessionPollError,
};
use oab_kiosk_core::{
    AuthToken, CoreError, Credentials, JsonFileStore, KeyValueStore, SessionConfig, SessionCreate,
    SessionUpdate, SessionVault, StoredSession, now_utc_seconds,
};
use oab_kiosk_elevation::{AdminSecret, ElevationError, ElevationGate, platform_provider};
use oab_kiosk_remote::{HttpRemoteSessionApi, RemoteError, RemoteSessionApi, validate_base_url};
use oab_kiosk_timer::{
    CountdownTimer, SessionHolder, TimerEvent, TimerEvents, TimerSettings, TimerState,
};
use oab_kiosk_ui::{
    Notifier, OverlayView, PresentationBridge, SessionEndReason, SessionStartPayload, UserMessage,
};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("OAB_KIOSK_VERSION");

/// Backend base URL (required).
pub const ENV_API_URL: &str = "OAB_KIOSK_API_URL";
/// Session length in seconds.
pub const ENV_SESSION_SECONDS: &str = "OAB_KIOSK_SESSION_SECONDS";
/// Validity poll interval in seconds.
pub const ENV_POLL_INTERVAL_SECS: &str = "OAB_KIOSK_POLL_INTERVAL_SECS";
/// Per-request timeout in seconds.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "OAB_KIOSK_REQUEST_TIMEOUT_SECS";
/// Hex SHA-256 digest of the administrator password.
pub const ENV_ADMIN_PASSWORD_SHA256: &str = "OAB_KIOSK_ADMIN_PASSWORD_SHA256";
/// Plaintext administrator password, hashed at load.
pub const ENV_ADMIN_PASSWORD: &str = "OAB_KIOSK_ADMIN_PASSWORD";
/// Session vault file.
pub const ENV_STORE_PATH: &str = "OAB_KIOSK_STORE_PATH";
/// Directory for per-run log files.
pub const ENV_LOG_DIR: &str = "OAB_KIOSK_LOG_DIR";
/// Log filter directive.
pub const ENV_LOG: &str = "OAB_KIOSK_LOG";
/// Consent command used on non-Windows platforms.
pub const ENV_CONSENT_COMMAND: &str = "OAB_KIOSK_CONSENT_COMMAND";

/// Default session length (30 minutes).
pub const DEFAULT_SESSION_SECONDS: u64 = 1_800;
/// Default validity poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_STORE_FILE: &str = "oab-kiosk-store.json";
const DEFAULT_LOG_FILTER: &str = "info";

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Validated backend base URL.
    pub api_url: String,
    /// Session length in seconds.
    pub session_seconds: u64,
    /// Validity poll interval.
    pub poll_interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Administrator secret for the exit gate.
    pub admin_secret: AdminSecret,
    /// Session vault file.
    pub store_path: PathBuf,
    /// Log directory.
    pub log_dir: PathBuf,
    /// Log filter directive.
    pub log_filter: String,
    /// Consent command override.
    pub consent_command: Option<String>,
}

impl AppConfig {
    /// Reads configuration from process environment variables.
    ///
    /// # Errors
    /// Returns [`ConfigError`] naming the missing or invalid variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`.
    ///
    /// Blank values count as unset. Relative defaults resolve next to the
    /// executable.
    ///
    /// # Errors
    /// Returns [`ConfigError`] naming the missing or invalid variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_url = read(ENV_API_URL).ok_or(ConfigError::Missing(ENV_API_URL))?;
        validate_base_url(&api_url).map_err(|error| ConfigError::Invalid {
            variable: ENV_API_URL,
            reason: error.to_string(),
        })?;

        let session_seconds = parse_positive(
            ENV_SESSION_SECONDS,
            read(ENV_SESSION_SECONDS),
            DEFAULT_SESSION_SECONDS,
        )?;
        let poll_interval = Duration::from_secs(parse_positive(
            ENV_POLL_INTERVAL_SECS,
            read(ENV_POLL_INTERVAL_SECS),
            DEFAULT_POLL_INTERVAL.as_secs(),
        )?);
        let request_timeout = Duration::from_secs(parse_positive(
            ENV_REQUEST_TIMEOUT_SECS,
            read(ENV_REQUEST_TIMEOUT_SECS),
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        )?);

        // Passwords are taken verbatim; surrounding spaces are significant.
        let admin_secret = match (
            read(ENV_ADMIN_PASSWORD_SHA256),
            lookup(ENV_ADMIN_PASSWORD).filter(|value| !value.is_empty()),
        ) {
            (Some(digest), _) => {
                AdminSecret::from_sha256_hex(&digest).map_err(|error| ConfigError::Invalid {
                    variable: ENV_ADMIN_PASSWORD_SHA256,
                    reason: error.to_string(),
                })?
            }
            (None, Some(password)) => AdminSecret::from_plaintext(&password),
            (None, None) => AdminSecret::Unset,
        };

        let runtime_dir = default_runtime_dir();
        Ok(Self {
            api_url,
            session_seconds,
            poll_interval,
            request_timeout,
            admin_secret,
            store_path: read(ENV_STORE_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| runtime_dir.join(DEFAULT_STORE_FILE)),
            log_dir: read(ENV_LOG_DIR)
                .map(PathBuf::from)
                .unwrap_or(runtime_dir),
            log_filter: read(ENV_LOG).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            consent_command: read(ENV_CONSENT_COMMAND),
        })
    }

    /// Controller settings derived from this configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a duration is zero.
    pub fn controller_settings(&self) -> Result<ControllerSettings, ConfigError> {
        ControllerSettings::new(self.session_seconds, self.poll_interval)
    }
}

fn parse_positive(
    variable: &'static str,
    raw: Option<String>,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            variable,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(value) => Ok(value),
        Err(error) => Err(ConfigError::Invalid {
            variable,
            reason: format!("'{raw}' is not a whole number of seconds: {error}"),
        }),
    }
}

fn default_runtime_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Required variable is unset.
    #[error("{0} must be set")]
    Missing(&'static str),
    /// Variable holds an unusable value.
    #[error("{variable} is invalid: {reason}")]
    Invalid {
        /// Offending variable.
        variable: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Formats `now` as `YYYYMMDD_HHMMSS`.
pub fn timestamp_compact(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Name of the per-run log file started at `now`.
pub fn log_file_name(now: OffsetDateTime) -> String {
    format!("{}_log.txt", timestamp_compact(now))
}

/// Installs the global file logger for this run and returns the log path.
///
/// # Errors
/// Returns [`LoggingError`] when the filter is invalid, the file cannot be
/// created or a global subscriber is already installed.
pub fn init_logging(log_dir: &Path, filter: &str) -> Result<PathBuf, LoggingError> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|error| LoggingError::Filter(format!("'{filter}': {error}")))?;

    std::fs::create_dir_all(log_dir).map_err(|error| LoggingError::File {
        path: log_dir.to_path_buf(),
        message: error.to_string(),
    })?;
    let path = log_dir.join(log_file_name(OffsetDateTime::now_utc()));
    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|error| LoggingError::File {
            path: path.clone(),
            message: error.to_string(),
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|error| LoggingError::Install(error.to_string()))?;

    info!(
        stage = "logging",
        action = "file_created",
        log_file = %path.display(),
        version = APP_VERSION
    );
    Ok(path)
}

/// Logging set-up errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Filter directive did not parse.
    #[error("invalid log filter {0}")]
    Filter(String),
    /// Log directory or file could not be created.
    #[error("unable to create log file '{path}': {message}")]
    File {
        /// Path involved.
        path: PathBuf,
        /// I/O failure.
        message: String,
    },
    /// A global subscriber already exists.
    #[error("unable to install logger: {0}")]
    Install(String),
}

/// Redacts common secret markers in log-safe output.
///
/// Everything after the first secret marker is dropped.
pub fn redact_sensitive(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let marker = [
        "password",
        "senha",
        "token",
        "authorization",
        "bearer",
        "codigo_de_seguranca",
        "security_code",
    ]
    .into_iter()
    .filter_map(|key| lower.find(key).map(|position| (position, key)))
    .min_by_key(|(position, _)| *position);

    match marker {
        Some((position, key)) => format!("{}{key}=<redacted>", &input[..position]),
        None => input.to_string(),
    }
}

/// Durations the controller runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    session_seconds: u64,
    poll_interval: Duration,
    timer: TimerSettings,
}

impl ControllerSettings {
    /// Creates settings with the default one-second countdown.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a zero session length or poll
    /// interval.
    pub fn new(session_seconds: u64, poll_interval: Duration) -> Result<Self, ConfigError> {
        if session_seconds == 0 {
            return Err(ConfigError::Invalid {
                variable: ENV_SESSION_SECONDS,
                reason: "must be greater than zero".to_string(),
            });
        }
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                variable: ENV_POLL_INTERVAL_SECS,
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            session_seconds,
            poll_interval,
            timer: TimerSettings::default(),
        })
    }

    /// Replaces the countdown settings.
    pub fn with_timer(mut self, timer: TimerSettings) -> Self {
        self.timer = timer;
        self
    }

    /// Session length in seconds.
    pub fn session_seconds(&self) -> u64 {
        self.session_seconds
    }

    /// Validity poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            session_seconds: DEFAULT_SESSION_SECONDS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timer: TimerSettings::default(),
        }
    }
}

/// Injected collaborators of the controller.
#[derive(Clone)]
pub struct Collaborators {
    /// Remote Session API.
    pub api: Arc<dyn RemoteSessionApi>,
    /// Durable key-value storage backing the session vault.
    pub store: Arc<dyn KeyValueStore>,
    /// Native notification sink.
    pub notifier: Arc<dyn Notifier>,
    /// Window-transition sink.
    pub bridge: Arc<dyn PresentationBridge>,
    /// Exit gate.
    pub gate: ElevationGate,
}

/// Result of one validity poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No live session to poll.
    Idle,
    /// Another poll was in flight; nothing was sent.
    Skipped,
    /// Backend reports the session active.
    Active,
    /// Backend ended the session; local state was torn down.
    Ended,
    /// Backend no longer knows the session; polling stopped.
    Gone,
    /// Poll failed; the next interval retries.
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndTrigger {
    UserLogout,
    Expired,
    EndedRemotely { stamp_end: bool },
}

impl EndTrigger {
    fn reason(self) -> SessionEndReason {
        match self {
            Self::UserLogout => SessionEndReason::UserLogout,
            Self::Expired => SessionEndReason::Expired,
            Self::EndedRemotely { .. } => SessionEndReason::EndedRemotely,
        }
    }
}

struct ActiveSession {
    generation: u64,
    token: AuthToken,
    session_id: i64,
    poller: CancellationToken,
}

#[derive(Default)]
struct ControllerState {
    machine: LifecycleMachine,
    active: Option<ActiveSession>,
}

struct Inner {
    api: Arc<dyn RemoteSessionApi>,
    auth: AuthClient,
    vault: SessionVault,
    timer: CountdownTimer,
    notifier: Arc<dyn Notifier>,
    bridge: Arc<dyn PresentationBridge>,
    gate: ElevationGate,
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
    poll_in_flight: AtomicBool,
    next_generation: AtomicU64,
}

/// Clears the in-flight flag when the poll finishes, whatever the outcome.
struct PollPermit<'a>(&'a AtomicBool);

impl<'a> PollPermit<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PollPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Session Lifecycle Controller.
///
/// # Lifecycle
/// `LoggedOut -> Authenticating -> SessionPending -> SessionActive ->
/// Expiring -> LoggedOut`. Logins are serialized: a second login while one is
/// in flight fails with [`LoginError::Busy`].
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Creates a controller in `LoggedOut`.
    pub fn new(collaborators: Collaborators, settings: ControllerSettings) -> Self {
        let Collaborators {
            api,
            store,
            notifier,
            bridge,
            gate,
        } = collaborators;
        Self {
            inner: Arc::new(Inner {
                auth: AuthClient::new(Arc::clone(&api)),
                api,
                vault: SessionVault::new(store),
                timer: CountdownTimer::with_settings(settings.timer.clone()),
                notifier,
                bridge,
                gate,
                settings,
                state: Mutex::new(ControllerState::default()),
                poll_in_flight: AtomicBool::new(false),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lock_state().machine.state()
    }

    /// Returns `true` only while a session is active and token, identity and
    /// session id are all stored.
    pub fn is_authenticated(&self) -> bool {
        self.state() == LifecycleState::SessionActive
            && matches!(self.inner.vault.load_session(), Ok(Some(_)))
    }

    /// Clears session keys left by a previous run. Returns `true` when
    /// anything was found. Does nothing while a session is live.
    ///
    /// # Errors
    /// Returns the storage failure.
    pub fn discard_stale_session(&self) -> Result<bool, CoreError> {
        if self.lock_state().machine.has_session() {
            return Ok(false);
        }
        let stale =
            self.inner.vault.token()?.is_some() || self.inner.vault.session_id()?.is_some();
        self.inner.vault.clear_session()?;
        if stale {
            info!(stage = "startup", action = "stale_session_cleared");
        }
        Ok(stale)
    }

    /// Stored station configuration.
    ///
    /// # Errors
    /// Returns the storage or codec failure.
    pub fn session_config(&self) -> Result<Option<SessionConfig>, CoreError> {
        self.inner.vault.load_config()
    }

    /// Stores a new station configuration, keeping a known user id.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] for non-positive ids.
    pub fn update_config(
        &self,
        station_id: i64,
        supervisor_id: i64,
    ) -> Result<SessionConfig, CoreError> {
        let saved = self
            .inner
            .vault
            .save_config(&SessionConfig::new(station_id, supervisor_id))?;
        info!(
            stage = "config",
            action = "updated",
            station_id,
            supervisor_id
        );
        Ok(saved)
    }

    /// Removes the stored station configuration.
    ///
    /// # Errors
    /// Returns the storage failure.
    pub fn clear_config(&self) -> Result<(), CoreError> {
        self.inner.vault.clear_config()?;
        info!(stage = "config", action = "cleared");
        Ok(())
    }

    /// Current countdown snapshot.
    pub fn timer_state(&self) -> TimerState {
        self.inner.timer.snapshot()
    }

    /// Overlay projection of the countdown.
    pub fn overlay(&self) -> OverlayView {
        OverlayView::from_state(&self.inner.timer.snapshot())
    }

    /// Subscribes to remaining-seconds updates.
    pub fn subscribe_remaining(&self) -> watch::Receiver<u64> {
        self.inner.timer.subscribe()
    }

    /// Authenticates, opens the remote session and starts the countdown.
    ///
    /// # Semantics
    /// The session id is stored before the countdown starts. Any failure
    /// after authentication rolls back to `LoggedOut` with nothing stored.
    ///
    /// # Errors
    /// Returns [`LoginError`] describing the failing step.
    pub async fn login(&self, credentials: &Credentials) -> Result<SessionStartPayload, LoginError> {
        self.lock_state()
            .machine
            .begin_login()
            .map_err(LoginError::from_lifecycle)?;
        info!(stage = "login", action = "begin");

        match self.open_session(credentials).await {
            Ok(payload) => {
                self.inner.bridge.on_login_succeeded(payload.clone());
                Ok(payload)
            }
            Err(error) => {
                self.lock_state().machine.logout();
                warn!(stage = "login", action = "rolled_back", reason = %error);
                Err(error)
            }
        }
    }

    async fn open_session(
        &self,
        credentials: &Credentials,
    ) -> Result<SessionStartPayload, LoginError> {
        let user = self.inner.auth.login(credentials).await?;
        self.lock_state()
            .machine
            .on_authenticated()
            .map_err(LoginError::from_lifecycle)?;

        let config = self.login_config()?;
        let body = SessionCreate::new(
            &config,
            user.identity.user_id,
            now_utc_seconds(),
            self.inner.settings.session_seconds,
        )
        .map_err(|error| SessionCreationError::config(error.to_string()))?;

        let remote = self
            .inner
            .api
            .create_session(&user.token, &body)
            .await
            .map_err(|error| {
                let mapped = SessionCreationError::from_transport(&error);
                warn!(
                    stage = "session",
                    action = "create_failed",
                    status = ?error.status,
                    reason = %mapped
                );
                mapped
            })?;
        let session_id = remote.session_id;

        let stored = StoredSession {
            token: user.token.clone(),
            identity: user.identity.clone(),
            session_id,
        };
        if let Err(error) = self.inner.vault.persist_session(&stored) {
            // Identity and session id may already be written.
            if let Err(clear_error) = self.inner.vault.clear_session() {
                error!(stage = "login", action = "vault_clear_failed", error = %clear_error);
            }
            self.discard_unpersisted_session(&user.token, session_id)
                .await;
            return Err(LoginError::Storage(error));
        }
        if let Err(error) = self
            .inner
            .vault
            .save_config(&config.with_user(user.identity.user_id))
        {
            warn!(stage = "config", action = "user_write_back_failed", error = %error);
        }

        let total_seconds = self.inner.settings.session_seconds;
        let events = self.inner.timer.start(
            total_seconds,
            SessionHolder::new(
                user.identity.display_name.clone(),
                user.identity.registration_id.clone(),
            ),
        );

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let poller = CancellationToken::new();
        let started = {
            let mut state = self.lock_state();
            let started = state.machine.on_session_started();
            if started.is_ok() {
                state.active = Some(ActiveSession {
                    generation,
                    token: user.token.clone(),
                    session_id,
                    poller: poller.clone(),
                });
            }
            started
        };
        if let Err(error) = started {
            self.inner.timer.stop();
            if let Err(error) = self.inner.vault.clear_session() {
                error!(stage = "login", action = "vault_clear_failed", error = %error);
            }
            self.discard_unpersisted_session(&user.token, session_id)
                .await;
            return Err(LoginError::from_lifecycle(error));
        }

        tokio::spawn(self.clone().pump_timer_events(generation, events));
        tokio::spawn(self.clone().run_poller(generation, poller));

        info!(
            stage = "session",
            action = "started",
            session_id,
            user_id = user.identity.user_id,
            total_seconds
        );
        Ok(SessionStartPayload {
            user_name: user.identity.display_name,
            oab_number: user.identity.registration_id,
            total_seconds,
        })
    }

    fn login_config(&self) -> Result<SessionConfig, SessionCreationError> {
        let config = self
            .inner
            .vault
            .load_config()
            .map_err(|error| SessionCreationError::config(error.to_string()))?
            .ok_or_else(|| SessionCreationError::config("session config is not set"))?;
        config
            .validate()
            .map_err(|error| SessionCreationError::config(error.to_string()))?;
        Ok(config)
    }

    async fn discard_unpersisted_session(&self, token: &AuthToken, session_id: i64) {
        if let Err(error) = self.inner.api.finalize_session(token, session_id).await {
            warn!(
                stage = "login",
                action = "orphan_finalize_failed",
                session_id,
                error = %error
            );
        }
    }

    /// Ends the live session: stops polling, finalizes the remote session,
    /// clears storage, stops the countdown and returns to the login view.
    ///
    /// Returns `false` when there was no session to end.
    pub async fn logout(&self) -> bool {
        self.end_session(None, EndTrigger::UserLogout).await
    }

    /// Same convergence as [`Self::logout`] without the finalize call, plus
    /// the administrator-ended notification.
    pub async fn force_logout_on_session_inactive(&self) -> bool {
        self.end_session(None, EndTrigger::EndedRemotely { stamp_end: false })
            .await
    }

    /// Runs one validity poll unless another one is in flight.
    pub async fn poll_once(&self) -> PollOutcome {
        self.poll_session(None).await
    }

    /// Checks the exit password and OS consent, then ends any live session
    /// and tells the bridge the shell may terminate.
    ///
    /// # Errors
    /// Returns the gate's [`ElevationError`]; nothing is torn down then.
    pub async fn request_exit(&self, password: &str) -> Result<(), ElevationError> {
        self.inner.gate.authorize_exit(password).await?;
        self.logout().await;
        self.inner.bridge.on_exit_approved();
        Ok(())
    }

    async fn pump_timer_events(self, generation: u64, mut events: TimerEvents) {
        while let Some(event) = events.recv().await {
            match event {
                TimerEvent::Tick(_) => {}
                TimerEvent::Threshold(minutes) => {
                    info!(stage = "timer", action = "threshold", minutes);
                    self.inner
                        .notifier
                        .notify(UserMessage::threshold(minutes))
                        .await;
                }
                TimerEvent::Expired => {
                    info!(stage = "timer", action = "expired");
                    self.end_session(Some(generation), EndTrigger::Expired)
                        .await;
                    break;
                }
            }
        }
    }

    async fn run_poller(self, generation: u64, cancel: CancellationToken) {
        let period = self.inner.settings.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.poll_session(Some(generation)).await {
                PollOutcome::Active | PollOutcome::Skipped | PollOutcome::Transient => {}
                PollOutcome::Ended | PollOutcome::Gone | PollOutcome::Idle => break,
            }
        }
        debug!(stage = "poller", action = "stopped", generation);
    }

    async fn poll_session(&self, expected: Option<u64>) -> PollOutcome {
        let Some((generation, token, session_id)) = self.active_session() else {
            return PollOutcome::Idle;
        };
        if expected.is_some_and(|wanted| wanted != generation) {
            return PollOutcome::Idle;
        }
        let Some(_permit) = PollPermit::acquire(&self.inner.poll_in_flight) else {
            debug!(stage = "poller", action = "skipped_in_flight");
            return PollOutcome::Skipped;
        };

        let error = match self.inner.api.get_session(&token, session_id).await {
            Ok(remote) if remote.is_active => return PollOutcome::Active,
            Ok(remote) => {
                info!(stage = "poller", action = "session_inactive", session_id);
                let stamp_end = remote.ends_at.is_none();
                self.end_session(Some(generation), EndTrigger::EndedRemotely { stamp_end })
                    .await;
                return PollOutcome::Ended;
            }
            Err(error) => error,
        };

        match SessionPollError::from_transport(error) {
            SessionPollError::Deactivated(detail) => {
                info!(
                    stage = "poller",
                    action = "session_rejected",
                    session_id,
                    detail = %redact_sensitive(&detail)
                );
                self.end_session(
                    Some(generation),
                    EndTrigger::EndedRemotely { stamp_end: false },
                )
                .await;
                PollOutcome::Ended
            }
            SessionPollError::NotFound => {
                warn!(stage = "poller", action = "session_not_found", session_id);
                self.stop_polling(generation);
                PollOutcome::Gone
            }
            SessionPollError::Transient(error) => {
                warn!(
                    stage = "poller",
                    action = "poll_failed",
                    session_id,
                    error = %redact_sensitive(&error.to_string())
                );
                PollOutcome::Transient
            }
        }
    }

    fn active_session(&self) -> Option<(u64, AuthToken, i64)> {
        self.lock_state()
            .active
            .as_ref()
            .map(|active| (active.generation, active.token.clone(), active.session_id))
    }

    fn stop_polling(&self, generation: u64) {
        if let Some(active) = self
            .lock_state()
            .active
            .as_ref()
            .filter(|active| active.generation == generation)
        {
            active.poller.cancel();
        }
    }

    /// Single teardown path. Only the caller that takes the active session
    /// performs the teardown; everyone else gets `false`.
    async fn end_session(&self, expected: Option<u64>, trigger: EndTrigger) -> bool {
        let active = {
            let mut state = self.lock_state();
            let matches = state
                .active
                .as_ref()
                .is_some_and(|active| expected.is_none_or(|wanted| wanted == active.generation));
            if !matches {
                return false;
            }
            let Some(active) = state.active.take() else {
                return false;
            };
            if let Err(error) = state.machine.begin_expiry() {
                warn!(stage = "session", action = "teardown_transition", error = %error);
            }
            active
        };
        active.poller.cancel();
        info!(
            stage = "session",
            action = "teardown",
            session_id = active.session_id,
            trigger = ?trigger
        );

        match trigger {
            EndTrigger::UserLogout | EndTrigger::Expired => {
                self.close_remote_session(&active.token, active.session_id)
                    .await;
            }
            EndTrigger::EndedRemotely { stamp_end: true } => {
                self.stamp_session_end(&active.token, active.session_id)
                    .await;
            }
            EndTrigger::EndedRemotely { stamp_end: false } => {}
        }

        if let Err(error) = self.inner.vault.clear_session() {
            error!(stage = "session", action = "vault_clear_failed", error = %error);
        }
        self.inner.timer.stop();
        self.lock_state().machine.logout();
        info!(stage = "session", action = "logged_out", session_id = active.session_id);

        if let EndTrigger::EndedRemotely { .. } = trigger {
            self.inner
                .notifier
                .notify(UserMessage::session_ended_by_administrator())
                .await;
        }
        self.inner.bridge.on_session_ended(trigger.reason());
        true
    }

    async fn close_remote_session(&self, token: &AuthToken, session_id: i64) {
        let error = match self.inner.api.finalize_session(token, session_id).await {
            Ok(_) => {
                info!(stage = "session", action = "finalized", session_id);
                return;
            }
            Err(error) if error.is_session_inactive() => {
                info!(stage = "session", action = "already_inactive", session_id);
                return;
            }
            Err(error) => error,
        };

        warn!(
            stage = "session",
            action = "finalize_failed",
            session_id,
            error = %redact_sensitive(&error.to_string())
        );
        let update = SessionUpdate::deactivate(now_utc_seconds());
        match self
            .inner
            .api
            .update_session(token, session_id, &update)
            .await
        {
            Ok(_) => info!(stage = "session", action = "deactivated", session_id),
            Err(error) => error!(
                stage = "session",
                action = "deactivate_failed",
                session_id,
                error = %redact_sensitive(&error.to_string())
            ),
        }
    }

    async fn stamp_session_end(&self, token: &AuthToken, session_id: i64) {
        let update = SessionUpdate::end_at(now_utc_seconds());
        if let Err(error) = self
            .inner
            .api
            .update_session(token, session_id, &update)
            .await
        {
            warn!(
                stage = "session",
                action = "end_stamp_failed",
                session_id,
                error = %redact_sensitive(&error.to_string())
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        // Critical sections never panic midway, so a poisoned lock still
        // guards consistent state.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Login failures.
#[derive(Debug, Error)]
pub enum LoginError {
    /// Another login is in flight.
    #[error("a login is already in progress")]
    Busy,
    /// A session is already live.
    #[error("a session is already active")]
    AlreadyActive,
    /// Authentication failed.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    /// Remote session could not be opened.
    #[error("session creation error: {0}")]
    SessionCreation(#[from] SessionCreationError),
    /// Session could not be stored locally.
    #[error("session storage error: {0}")]
    Storage(#[from] CoreError),
}

impl LoginError {
    fn from_lifecycle(error: LifecycleError) -> Self {
        match error {
            LifecycleError::SessionOpen => Self::AlreadyActive,
            // A competing transition won; report it like a concurrent login.
            LifecycleError::LoginInFlight | LifecycleError::IllegalTransition { .. } => Self::Busy,
        }
    }

    /// User-facing message for this failure.
    pub fn user_message(&self) -> UserMessage {
        match self {
            Self::Busy => UserMessage::inline("Login", "Aguarde: o login já está em andamento."),
            Self::AlreadyActive => UserMessage::inline("Login", "Já existe uma sessão ativa."),
            Self::Auth(error) => UserMessage::from_auth_error(error),
            Self::SessionCreation(error) => UserMessage::from_session_creation_error(error),
            Self::Storage(_) => UserMessage::blocking(
                "Falha local",
                "Não foi possível salvar a sessão neste computador.",
            ),
        }
    }
}

/// Wires the production collaborators from `config`.
///
/// # Errors
/// Returns [`AppError`] when the endpoint, store or consent command is
/// unusable.
pub fn build_controller(
    config: &AppConfig,
    notifier: Arc<dyn Notifier>,
    bridge: Arc<dyn PresentationBridge>,
) -> Result<SessionController, AppError> {
    let api = HttpRemoteSessionApi::new(&config.api_url, config.request_timeout)?;
    let store = JsonFileStore::open(&config.store_path)?;
    let provider = platform_provider(config.consent_command.as_deref())?;
    let settings = config.controller_settings()?;

    Ok(SessionController::new(
        Collaborators {
            api: Arc::new(api),
            store: Arc::new(store),
            notifier,
            bridge,
            gate: ElevationGate::new(config.admin_secret.clone(), provider),
        },
        settings,
    ))
}

/// Console shell commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `config <station> <supervisor>`
    Config {
        /// Station id.
        station_id: i64,
        /// Supervisor id.
        supervisor_id: i64,
    },
    /// `login <registration> <code>`
    Login(Credentials),
    /// `logout`
    Logout,
    /// `status`
    Status,
    /// `exit <password>`; the password is the rest of the line.
    Exit(String),
    /// `help`
    Help,
}

impl ConsoleCommand {
    /// Parses one input line.
    ///
    /// # Errors
    /// Returns [`CommandError`] for unknown verbs or bad arguments.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_start();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();

        match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("config", [station, supervisor]) => Ok(Self::Config {
                station_id: parse_id("station", station)?,
                supervisor_id: parse_id("supervisor", supervisor)?,
            }),
            ("login", [registration, code]) => {
                Ok(Self::Login(Credentials::new(*registration, *code)))
            }
            ("logout", []) => Ok(Self::Logout),
            ("status", []) => Ok(Self::Status),
            ("exit", _) => Ok(Self::Exit(rest.trim_end_matches(['\r', '\n']).to_string())),
            ("help", []) => Ok(Self::Help),
            ("config" | "login" | "logout" | "status" | "help", _) => {
                Err(CommandError::Usage(verb.to_ascii_lowercase()))
            }
            _ => Err(CommandError::Unknown(verb.to_string())),
        }
    }
}

fn parse_id(field: &'static str, raw: &str) -> Result<i64, CommandError> {
    raw.parse()
        .map_err(|_| CommandError::InvalidNumber { field, raw: raw.to_string() })
}

/// Console usage text.
pub const CONSOLE_HELP: &str = "commands: config <station> <supervisor> | login <registration> <code> | logout | status | exit <password> | help";

/// Console parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Unknown verb.
    #[error("unknown command '{0}'")]
    Unknown(String),
    /// Known verb with the wrong arguments.
    #[error("wrong arguments for '{0}'")]
    Usage(String),
    /// Non-numeric id.
    #[error("{field} must be a number, got '{raw}'")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw input.
        raw: String,
    },
}

/// Latch raised once the exit gate approves leaving the kiosk.
///
/// Clones share one latch.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    approved: Arc<watch::Sender<bool>>,
}

impl ExitSignal {
    /// Creates a lowered latch.
    pub fn new() -> Self {
        Self {
            approved: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Raises the latch. Idempotent.
    pub fn approve(&self) {
        self.approved.send_replace(true);
    }

    /// Returns `true` once [`Self::approve`] has been called.
    pub fn is_approved(&self) -> bool {
        *self.approved.borrow()
    }

    /// Waits until the latch is raised.
    pub async fn approved(&self) {
        let mut receiver = self.approved.subscribe();
        // The sender lives in `self`, so the wait cannot fail.
        let _ = receiver.wait_for(|approved| *approved).await;
    }
}

impl Default for ExitSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds console lines to `handle` until the exit gate approves.
///
/// Blank lines are skipped. Closed input does not end the shell: with no
/// way left to type the administrator password, the kiosk stays up and
/// keeps policing the session until `exit` is raised by other means.
///
/// # Errors
/// Returns the underlying I/O error when reading input fails.
pub async fn run_console<R, H, Fut>(
    input: R,
    exit: &ExitSignal,
    mut handle: H,
) -> Result<(), std::io::Error>
where
    R: AsyncBufRead + Unpin,
    H: FnMut(Result<ConsoleCommand, CommandError>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = ConsoleCommand::parse(&line);
        if let Err(error) = &command {
            warn!(
                stage = "console",
                action = "bad_command",
                error = %redact_sensitive(&error.to_string())
            );
        }
        handle(command).await;
        if exit.is_approved() {
            info!(stage = "app", action = "exit");
            return Ok(());
        }
    }

    warn!(stage = "console", action = "stdin_closed");
    exit.approved().await;
    info!(stage = "app", action = "exit");
    Ok(())
}

/// App start-up error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Logging set-up error.
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),
    /// Remote client construction error.
    #[error("remote client error: {0}")]
    Remote(#[from] RemoteError),
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),
    /// Exit gate set-up error.
    #[error("elevation error: {0}")]
    Elevation(#[from] ElevationError),
    /// Console I/O error.
    #[error("console error: {0}")]
    Io(#[from] std::io::Error),
}
