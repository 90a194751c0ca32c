//! Shared fakes and fixtures for app integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use oab_kiosk_app::{Collaborators, ControllerSettings, ExitSignal, SessionController};
use oab_kiosk_core::{
    AuthToken, CoreError, Credentials, KeyValueStore, LoginRequest, LoginResponse, MemoryStore,
    RemoteSession, SessionConfig, SessionCreate, SessionUpdate, SessionVault, TOKEN_KEY,
};
use oab_kiosk_elevation::{AdminSecret, ElevationGate, ElevationProvider};
use oab_kiosk_remote::{RemoteSessionApi, TransportError};
use oab_kiosk_ui::{Notifier, PresentationBridge, SessionEndReason, SessionStartPayload, UserMessage};
use time::macros::datetime;

/// Administrator password configured for every harness.
#[allow(dead_code)]
pub const ADMIN_PASSWORD: &str = "kiosk-admin";
/// Session id returned by the fake backend.
#[allow(dead_code)]
pub const SESSION_ID: i64 = 77;
/// User id returned by the fake backend.
#[allow(dead_code)]
pub const USER_ID: i64 = 42;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum ApiCall {
    Authenticate(String),
    Create(SessionCreate),
    Update(i64, SessionUpdate),
    Finalize(i64),
    Get(i64),
}

/// Programmable in-memory Remote Session API.
pub struct FakeApi {
    login: Mutex<Result<LoginResponse, TransportError>>,
    create: Mutex<Result<RemoteSession, TransportError>>,
    update: Mutex<Result<RemoteSession, TransportError>>,
    finalize: Mutex<Result<RemoteSession, TransportError>>,
    get: Mutex<Result<RemoteSession, TransportError>>,
    login_delay: Mutex<Duration>,
    get_delay: Mutex<Duration>,
    calls: Mutex<Vec<ApiCall>>,
    gets_in_flight: AtomicUsize,
    max_gets_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            login: Mutex::new(Ok(login_response())),
            create: Mutex::new(Ok(remote_session(true))),
            update: Mutex::new(Ok(remote_session(false))),
            finalize: Mutex::new(Ok(remote_session(false))),
            get: Mutex::new(Ok(remote_session(true))),
            login_delay: Mutex::new(Duration::ZERO),
            get_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            gets_in_flight: AtomicUsize::new(0),
            max_gets_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_login(&self, result: Result<LoginResponse, TransportError>) {
        *self.login.lock().expect("lock") = result;
    }

    pub fn set_create(&self, result: Result<RemoteSession, TransportError>) {
        *self.create.lock().expect("lock") = result;
    }

    pub fn set_update(&self, result: Result<RemoteSession, TransportError>) {
        *self.update.lock().expect("lock") = result;
    }

    pub fn set_finalize(&self, result: Result<RemoteSession, TransportError>) {
        *self.finalize.lock().expect("lock") = result;
    }

    pub fn set_get(&self, result: Result<RemoteSession, TransportError>) {
        *self.get.lock().expect("lock") = result;
    }

    pub fn set_login_delay(&self, delay: Duration) {
        *self.login_delay.lock().expect("lock") = delay;
    }

    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().expect("lock") = delay;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn count(&self, matches: fn(&ApiCall) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn max_concurrent_gets(&self) -> usize {
        self.max_gets_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().expect("lock").push(call);
    }
}

#[async_trait]
impl RemoteSessionApi for FakeApi {
    async fn authenticate(&self, request: &LoginRequest) -> Result<LoginResponse, TransportError> {
        self.record(ApiCall::Authenticate(request.registro_oab.clone()));
        let delay = *self.login_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.login.lock().expect("lock").clone()
    }

    async fn create_session(
        &self,
        _token: &AuthToken,
        body: &SessionCreate,
    ) -> Result<RemoteSession, TransportError> {
        self.record(ApiCall::Create(body.clone()));
        self.create.lock().expect("lock").clone()
    }

    async fn update_session(
        &self,
        _token: &AuthToken,
        session_id: i64,
        body: &SessionUpdate,
    ) -> Result<RemoteSession, TransportError> {
        self.record(ApiCall::Update(session_id, body.clone()));
        self.update.lock().expect("lock").clone()
    }

    async fn finalize_session(
        &self,
        _token: &AuthToken,
        session_id: i64,
    ) -> Result<RemoteSession, TransportError> {
        self.record(ApiCall::Finalize(session_id));
        self.finalize.lock().expect("lock").clone()
    }

    async fn get_session(
        &self,
        _token: &AuthToken,
        session_id: i64,
    ) -> Result<RemoteSession, TransportError> {
        self.record(ApiCall::Get(session_id));
        let in_flight = self.gets_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_gets_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.get_delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.gets_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.get.lock().expect("lock").clone()
    }
}

/// Notifier that records every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<UserMessage>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn messages(&self) -> Vec<UserMessage> {
        self.messages.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: UserMessage) {
        self.messages.lock().expect("lock").push(message);
    }
}

/// One recorded bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum BridgeEvent {
    LoginSucceeded(SessionStartPayload),
    SessionEnded(SessionEndReason),
    ExitApproved,
}

/// Presentation bridge that records every call and raises an exit latch.
#[derive(Default)]
pub struct RecordingBridge {
    events: Mutex<Vec<BridgeEvent>>,
    exit: ExitSignal,
}

#[allow(dead_code)]
impl RecordingBridge {
    pub fn events(&self) -> Vec<BridgeEvent> {
        self.events.lock().expect("lock").clone()
    }

    pub fn exit_signal(&self) -> ExitSignal {
        self.exit.clone()
    }
}

impl PresentationBridge for RecordingBridge {
    fn on_login_succeeded(&self, payload: SessionStartPayload) {
        self.events
            .lock()
            .expect("lock")
            .push(BridgeEvent::LoginSucceeded(payload));
    }

    fn on_session_ended(&self, reason: SessionEndReason) {
        self.events
            .lock()
            .expect("lock")
            .push(BridgeEvent::SessionEnded(reason));
    }

    fn on_exit_approved(&self) {
        self.events
            .lock()
            .expect("lock")
            .push(BridgeEvent::ExitApproved);
        self.exit.approve();
    }
}

/// Consent provider with a fixed answer and a call counter.
pub struct FakeConsent {
    grant: bool,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FakeConsent {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ElevationProvider for FakeConsent {
    async fn request_consent(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.grant
    }
}

/// Store that refuses to write the token key, leaving earlier keys in place.
pub struct TokenWriteFailingStore {
    inner: Arc<MemoryStore>,
}

impl KeyValueStore for TokenWriteFailingStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        if key == TOKEN_KEY {
            return Err(CoreError::Storage("disk full".to_string()));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.inner.remove(key)
    }
}

/// Controller wired to fakes.
#[allow(dead_code)]
pub struct Harness {
    pub controller: SessionController,
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub bridge: Arc<RecordingBridge>,
    pub consent: Arc<FakeConsent>,
}

#[allow(dead_code)]
impl Harness {
    /// Returns `true` when no session key is left in storage.
    pub fn vault_is_empty(&self) -> bool {
        [
            oab_kiosk_core::IDENTITY_KEY,
            oab_kiosk_core::SESSION_ID_KEY,
            oab_kiosk_core::TOKEN_KEY,
        ]
        .iter()
        .all(|key| self.store.get(key).expect("store read").is_none())
    }
}

/// Harness with station 3 / supervisor 9 configured.
#[allow(dead_code)]
pub fn harness(session_seconds: u64) -> Harness {
    let harness = harness_without_config(session_seconds, true);
    SessionVault::new(harness.store.clone())
        .save_config(&SessionConfig::new(3, 9))
        .expect("config fixture should save");
    harness
}

/// Harness with no station configuration stored.
#[allow(dead_code)]
pub fn harness_without_config(session_seconds: u64, grant_consent: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    build_harness(session_seconds, grant_consent, store.clone(), store)
}

/// Configured harness whose token writes fail.
///
/// `Harness::store` still exposes the backing memory store.
#[allow(dead_code)]
pub fn harness_with_failing_token_write(session_seconds: u64) -> Harness {
    let store = Arc::new(MemoryStore::new());
    SessionVault::new(store.clone())
        .save_config(&SessionConfig::new(3, 9))
        .expect("config fixture should save");
    let failing = Arc::new(TokenWriteFailingStore {
        inner: store.clone(),
    });
    build_harness(session_seconds, true, failing, store)
}

fn build_harness(
    session_seconds: u64,
    grant_consent: bool,
    controller_store: Arc<dyn KeyValueStore>,
    store: Arc<MemoryStore>,
) -> Harness {
    let api = FakeApi::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let bridge = Arc::new(RecordingBridge::default());
    let consent = Arc::new(FakeConsent {
        grant: grant_consent,
        calls: AtomicUsize::new(0),
    });

    let settings = ControllerSettings::new(session_seconds, Duration::from_secs(10))
        .expect("settings fixture should be valid");
    let controller = SessionController::new(
        Collaborators {
            api: api.clone(),
            store: controller_store,
            notifier: notifier.clone(),
            bridge: bridge.clone(),
            gate: ElevationGate::new(AdminSecret::from_plaintext(ADMIN_PASSWORD), consent.clone()),
        },
        settings,
    );

    Harness {
        controller,
        api,
        store,
        notifier,
        bridge,
        consent,
    }
}

/// Well-formed login form input.
#[allow(dead_code)]
pub fn credentials() -> Credentials {
    Credentials::new("123456", "4321")
}

/// Successful login response fixture.
#[allow(dead_code)]
pub fn login_response() -> LoginResponse {
    LoginResponse {
        access_token: "token-abc".to_string(),
        token_type: "bearer".to_string(),
        tipo_usuario: "advogado".to_string(),
        usuario_id: USER_ID,
        cadastro_id: 7,
        nome: "Maria Souza".to_string(),
    }
}

/// Remote session fixture with an end timestamp.
#[allow(dead_code)]
pub fn remote_session(is_active: bool) -> RemoteSession {
    RemoteSession {
        session_id: SESSION_ID,
        date: Some("2025-03-01".to_string()),
        started_at: datetime!(2025-03-01 10:00:00 UTC),
        ends_at: Some(datetime!(2025-03-01 10:30:00 UTC)),
        is_active,
        station_id: 3,
        user_id: USER_ID,
        supervisor_id: 9,
        analyst_ids: Vec::new(),
    }
}
