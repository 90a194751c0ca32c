#![warn(missing_docs)]
//! # oab-kiosk-core
//!
//! ## Purpose
//! Defines the pure data model and durable local storage used across the
//! `oab-kiosk` workspace.
//!
//! ## Responsibilities
//! - Represent credentials, tokens, user identity, session configuration and
//!   remote session records.
//! - Define the wire payloads exchanged with the Remote Session API.
//! - Provide the durable key-value store and the [`SessionVault`] that owns
//!   the storage layout and write ordering of a live session.
//!
//! ## Data flow
//! The auth layer turns a [`LoginResponse`] into an [`AuthToken`] and a
//! [`UserIdentity`]. The controller combines the stored [`SessionConfig`]
//! with the user id into a [`SessionCreate`] payload, receives a
//! [`RemoteSession`], and finally writes everything through [`SessionVault`].
//!
//! ## Ownership and lifetimes
//! All records own their strings so they can cross async task boundaries
//! without borrowing from transient network buffers.
//!
//! ## Error model
//! Storage I/O, JSON codec and configuration validation failures return
//! [`CoreError`] variants.
//!
//! ## Security and privacy notes
//! [`AuthToken`] and [`Credentials`] never print their secret parts through
//! `Debug`. Security codes are never written to storage.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use oab_kiosk_core::{MemoryStore, SessionConfig, SessionVault};
//!
//! let vault = SessionVault::new(Arc::new(MemoryStore::new()));
//! vault.save_config(&SessionConfig::new(4, 7)).unwrap();
//! assert_eq!(vault.load_config().unwrap().unwrap().station_id, 4);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime, macros::format_description};

/// Storage key holding the bearer token.
pub const TOKEN_KEY: &str = "oab_token";
/// Storage key holding the JSON identity blob.
pub const IDENTITY_KEY: &str = "oab_identity";
/// Storage key holding the remote session id.
pub const SESSION_ID_KEY: &str = "oab_sessao_id";
/// Storage key holding the JSON session configuration.
pub const SESSION_CONFIG_KEY: &str = "session_config";

/// Login credentials typed by the practitioner.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// OAB registration number.
    pub registration_id: String,
    /// Security code issued with the registration.
    pub security_code: String,
}

impl Credentials {
    /// Creates credentials from raw form values.
    pub fn new(registration_id: impl Into<String>, security_code: impl Into<String>) -> Self {
        Self {
            registration_id: registration_id.into(),
            security_code: security_code.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("registration_id", &self.registration_id)
            .field("security_code", &"<redacted>")
            .finish()
    }
}

/// Opaque bearer token issued by the Remote Session API.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token value.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw token for the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Authenticated user identity, read-only after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Backend user id.
    pub user_id: i64,
    /// OAB registration number used to log in.
    pub registration_id: String,
    /// Name shown on the session overlay.
    pub display_name: String,
    /// Backend user kind (for example `advogado`).
    pub user_kind: String,
    /// Backend registry record id.
    pub record_id: i64,
}

/// Station configuration required to open a remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Workstation id registered on the backend.
    #[serde(rename = "computador_id")]
    pub station_id: i64,
    /// Supervising administrator id.
    #[serde(rename = "administrador_id")]
    pub supervisor_id: i64,
    /// Last authenticated user id, filled in after login.
    #[serde(rename = "usuario_id", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl SessionConfig {
    /// Creates a configuration without a known user.
    pub fn new(station_id: i64, supervisor_id: i64) -> Self {
        Self {
            station_id,
            supervisor_id,
            user_id: None,
        }
    }

    /// Checks that both ids are strictly positive.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.station_id <= 0 {
            return Err(CoreError::InvalidConfig(
                "station id must be a positive integer".to_string(),
            ));
        }
        if self.supervisor_id <= 0 {
            return Err(CoreError::InvalidConfig(
                "supervisor id must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a copy carrying `user_id`.
    pub fn with_user(&self, user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..self.clone()
        }
    }
}

/// Remote session record as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSession {
    /// Backend session id.
    #[serde(rename = "sessao_id")]
    pub session_id: i64,
    /// Calendar date of the session (`YYYY-MM-DD`).
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Session start.
    #[serde(rename = "inicio_de_sessao", with = "wire_time")]
    pub started_at: OffsetDateTime,
    /// Session end, `None` while open-ended.
    #[serde(rename = "final_de_sessao", default, with = "wire_time::option")]
    pub ends_at: Option<OffsetDateTime>,
    /// Whether the backend still considers this session valid.
    #[serde(rename = "ativado")]
    pub is_active: bool,
    /// Workstation id.
    #[serde(rename = "computador_id")]
    pub station_id: i64,
    /// Practitioner id.
    #[serde(rename = "usuario_id")]
    pub user_id: i64,
    /// Supervising administrator id.
    #[serde(rename = "administrador_id")]
    pub supervisor_id: i64,
    /// Analysts attached to the session.
    #[serde(rename = "analista_ids", default, skip_serializing_if = "Vec::is_empty")]
    pub analyst_ids: Vec<i64>,
}

/// Login request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// OAB registration number.
    pub registro_oab: String,
    /// Security code.
    pub codigo_de_seguranca: String,
}

impl From<&Credentials> for LoginRequest {
    fn from(credentials: &Credentials) -> Self {
        Self {
            registro_oab: credentials.registration_id.trim().to_string(),
            codigo_de_seguranca: credentials.security_code.clone(),
        }
    }
}

/// Login response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token.
    pub access_token: String,
    /// Token scheme, normally `bearer`.
    #[serde(default)]
    pub token_type: String,
    /// Backend user kind.
    #[serde(default)]
    pub tipo_usuario: String,
    /// Backend user id.
    pub usuario_id: i64,
    /// Backend registry record id.
    #[serde(default)]
    pub cadastro_id: i64,
    /// Practitioner display name.
    #[serde(default)]
    pub nome: String,
}

impl LoginResponse {
    /// Derives the cached identity for `registration_id`.
    pub fn identity(&self, registration_id: &str) -> UserIdentity {
        UserIdentity {
            user_id: self.usuario_id,
            registration_id: registration_id.trim().to_string(),
            display_name: self.nome.clone(),
            user_kind: self.tipo_usuario.clone(),
            record_id: self.cadastro_id,
        }
    }
}

/// Session creation body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreate {
    /// Calendar date of the start timestamp.
    pub data: String,
    /// Start timestamp.
    #[serde(with = "wire_time")]
    pub inicio_de_sessao: OffsetDateTime,
    /// Planned end timestamp.
    #[serde(with = "wire_time")]
    pub final_de_sessao: OffsetDateTime,
    /// Always `true` on creation.
    pub ativado: bool,
    /// Workstation id.
    pub computador_id: i64,
    /// Practitioner id.
    pub usuario_id: i64,
    /// Supervising administrator id.
    pub administrador_id: i64,
    /// Analysts attached to the session.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analista_ids: Vec<i64>,
}

impl SessionCreate {
    /// Builds a creation body starting at `started_at` and lasting
    /// `duration_seconds`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] when `config` fails validation.
    pub fn new(
        config: &SessionConfig,
        user_id: i64,
        started_at: OffsetDateTime,
        duration_seconds: u64,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let seconds = i64::try_from(duration_seconds).map_err(|_| {
            CoreError::InvalidConfig("session duration is out of range".to_string())
        })?;
        let date = started_at
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(|error| CoreError::InvalidConfig(format!("unformattable date: {error}")))?;

        Ok(Self {
            data: date,
            inicio_de_sessao: started_at,
            final_de_sessao: started_at.saturating_add(Duration::seconds(seconds)),
            ativado: true,
            computador_id: config.station_id,
            usuario_id: user_id,
            administrador_id: config.supervisor_id,
            analista_ids: Vec::new(),
        })
    }
}

/// Partial session update body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// New end timestamp.
    #[serde(
        default,
        with = "wire_time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub final_de_sessao: Option<OffsetDateTime>,
    /// New activation flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ativado: Option<bool>,
}

impl SessionUpdate {
    /// Update that closes a session at `ended_at`.
    pub fn deactivate(ended_at: OffsetDateTime) -> Self {
        Self {
            final_de_sessao: Some(ended_at),
            ativado: Some(false),
        }
    }

    /// Update that only stamps the end timestamp.
    pub fn end_at(ended_at: OffsetDateTime) -> Self {
        Self {
            final_de_sessao: Some(ended_at),
            ativado: None,
        }
    }
}

/// Current UTC time truncated to whole seconds.
pub fn now_utc_seconds() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}

/// Timestamp codec accepting RFC 3339 and offset-less ISO timestamps.
///
/// Offset-less values are interpreted as UTC. Serialization always emits
/// RFC 3339.
pub mod wire_time {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::macros::format_description;
    use time::{OffsetDateTime, PrimitiveDateTime};

    /// Parses one wire timestamp.
    ///
    /// # Errors
    /// Returns the parse error of the offset-less fallback format.
    pub fn parse(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
        if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
            return Ok(value);
        }
        let naive = PrimitiveDateTime::parse(
            raw,
            format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
            ),
        )?;
        Ok(naive.assume_utc())
    }

    /// Serializes as RFC 3339.
    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = value.format(&Rfc3339).map_err(S::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    /// Deserializes from either accepted form.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }

    /// Same codec for nullable fields.
    pub mod option {
        use super::*;

        /// Serializes `Some` as RFC 3339 and `None` as `null`.
        pub fn serialize<S: Serializer>(
            value: &Option<OffsetDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => {
                    let formatted = value.format(&Rfc3339).map_err(S::Error::custom)?;
                    serializer.serialize_some(&formatted)
                }
                None => serializer.serialize_none(),
            }
        }

        /// Deserializes `null` as `None`.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| parse(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}

/// Durable string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Reads one value.
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// Writes one value.
    fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;

    /// Removes one value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::Storage("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::Storage("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::Storage("memory store lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Store persisted as one JSON object on disk.
///
/// Every mutation rewrites the file through a sibling temp file and an
/// atomic rename, so readers never observe a half-written document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist.
    ///
    /// # Errors
    /// Returns [`CoreError::Storage`] on I/O failure and
    /// [`CoreError::Codec`] when the file is not a JSON string map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(raw) if raw.is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(error) if error.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                return Err(CoreError::Storage(format!(
                    "unable to read '{}': {error}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<F>(&self, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::Storage("file store lock poisoned".to_string()))?;
        let mut next = entries.clone();
        f(&mut next);

        let encoded = serde_json::to_vec_pretty(&next)?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, encoded).map_err(|error| {
            CoreError::Storage(format!("unable to write '{}': {error}", staging.display()))
        })?;
        fs::rename(&staging, &self.path).map_err(|error| {
            CoreError::Storage(format!(
                "unable to replace '{}': {error}",
                self.path.display()
            ))
        })?;

        *entries = next;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::Storage("file store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }
}

/// Everything persisted for one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    /// Bearer token.
    pub token: AuthToken,
    /// Cached identity.
    pub identity: UserIdentity,
    /// Remote session id.
    pub session_id: i64,
}

/// Typed view over the storage keys of a live session and its config.
///
/// Session writes and clears follow the fixed order identity, session id,
/// token. A session is only considered present when all three keys are.
#[derive(Clone)]
pub struct SessionVault {
    store: Arc<dyn KeyValueStore>,
}

impl SessionVault {
    /// Wraps a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persists a freshly opened session.
    ///
    /// # Errors
    /// Returns the first storage or codec failure; keys written before the
    /// failure are left in place and are unusable without the token.
    pub fn persist_session(&self, session: &StoredSession) -> Result<(), CoreError> {
        let identity = serde_json::to_string(&session.identity)?;
        self.store.set(IDENTITY_KEY, &identity)?;
        self.store
            .set(SESSION_ID_KEY, &session.session_id.to_string())?;
        self.store.set(TOKEN_KEY, session.token.expose())
    }

    /// Loads the stored session when it is complete.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when the identity blob is corrupt.
    pub fn load_session(&self) -> Result<Option<StoredSession>, CoreError> {
        let (Some(identity), Some(session_id), Some(token)) = (
            self.store.get(IDENTITY_KEY)?,
            self.session_id()?,
            self.store.get(TOKEN_KEY)?,
        ) else {
            return Ok(None);
        };

        Ok(Some(StoredSession {
            token: AuthToken::new(token),
            identity: serde_json::from_str(&identity)?,
            session_id,
        }))
    }

    /// Reads the stored token, if any.
    pub fn token(&self) -> Result<Option<AuthToken>, CoreError> {
        Ok(self.store.get(TOKEN_KEY)?.map(AuthToken::new))
    }

    /// Reads the stored session id; unparsable values read as absent.
    pub fn session_id(&self) -> Result<Option<i64>, CoreError> {
        Ok(self
            .store
            .get(SESSION_ID_KEY)?
            .and_then(|raw| raw.trim().parse().ok()))
    }

    /// Removes the session keys in fixed order.
    ///
    /// Every key is attempted even when an earlier removal fails.
    ///
    /// # Errors
    /// Returns the first removal failure.
    pub fn clear_session(&self) -> Result<(), CoreError> {
        let mut first_error = None;
        for key in [IDENTITY_KEY, SESSION_ID_KEY, TOKEN_KEY] {
            if let Err(error) = self.store.remove(key) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Reads the stored session configuration.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when the stored blob is corrupt.
    pub fn load_config(&self) -> Result<Option<SessionConfig>, CoreError> {
        self.store
            .get(SESSION_CONFIG_KEY)?
            .map(|raw| serde_json::from_str(&raw).map_err(CoreError::Codec))
            .transpose()
    }

    /// Saves `config`, keeping a previously known user id when `config`
    /// carries none. Returns the configuration actually written.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] for non-positive ids.
    pub fn save_config(&self, config: &SessionConfig) -> Result<SessionConfig, CoreError> {
        config.validate()?;
        let mut merged = config.clone();
        if merged.user_id.is_none() {
            // A corrupt previous blob simply has no user id to carry over.
            merged.user_id = self.load_config().ok().flatten().and_then(|c| c.user_id);
        }
        let encoded = serde_json::to_string(&merged)?;
        self.store.set(SESSION_CONFIG_KEY, &encoded)?;
        Ok(merged)
    }

    /// Removes the stored configuration.
    pub fn clear_config(&self) -> Result<(), CoreError> {
        self.store.remove(SESSION_CONFIG_KEY)
    }
}

/// Error type for model validation, codec and storage failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Session configuration is missing a valid field.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
    /// Durable storage failure.
    #[error("storage failure: {0}")]
    Storage(String),
    /// JSON encoding/decoding error.
    #[error("codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}
