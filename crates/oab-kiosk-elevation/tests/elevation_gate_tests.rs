//! Integration tests for the password plus consent exit gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use oab_kiosk_elevation::{AdminSecret, ElevationError, ElevationGate, ElevationProvider};

struct CountingProvider {
    grant: bool,
    calls: AtomicUsize,
}

impl CountingProvider {
    fn new(grant: bool) -> Arc<Self> {
        Arc::new(Self {
            grant,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ElevationProvider for CountingProvider {
    async fn request_consent(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.grant
    }
}

fn gate(provider: Arc<CountingProvider>) -> ElevationGate {
    ElevationGate::new(AdminSecret::from_plaintext("kiosk-admin"), provider)
}

#[tokio::test]
async fn elevation_gate_tests_wrong_password_never_prompts() {
    let provider = CountingProvider::new(true);
    let gate = gate(provider.clone());

    assert!(!gate.request_exit("wrong").await);
    assert_eq!(
        gate.authorize_exit("wrong").await,
        Err(ElevationError::PasswordMismatch)
    );
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn elevation_gate_tests_correct_password_prompts_once_and_returns_grant() {
    let provider = CountingProvider::new(true);
    let gate = gate(provider.clone());

    assert!(gate.request_exit("kiosk-admin").await);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn elevation_gate_tests_refused_consent_denies_exit() {
    let provider = CountingProvider::new(false);
    let gate = gate(provider.clone());

    assert_eq!(
        gate.authorize_exit("kiosk-admin").await,
        Err(ElevationError::ConsentDenied)
    );
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn elevation_gate_tests_unset_secret_denies_without_prompt() {
    let provider = CountingProvider::new(true);
    let gate = ElevationGate::new(AdminSecret::Unset, provider.clone());

    assert!(!gate.request_exit("").await);
    assert!(!gate.request_exit("kiosk-admin").await);
    assert_eq!(provider.calls(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn elevation_gate_tests_command_provider_maps_exit_status() {
    use oab_kiosk_elevation::CommandConsentProvider;

    let granted = CommandConsentProvider::from_command_line("true").expect("command");
    let refused = CommandConsentProvider::from_command_line("false").expect("command");
    let missing = CommandConsentProvider::from_command_line("oab-kiosk-no-such-binary")
        .expect("command");

    assert!(granted.request_consent().await);
    assert!(!refused.request_consent().await);
    assert!(!missing.request_consent().await);
}
