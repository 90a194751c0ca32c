//! Integration tests for the remote session validity poller.

mod common;

use std::time::Duration;

use common::{ApiCall, BridgeEvent, SESSION_ID, credentials, harness, remote_session};
use oab_kiosk_app::PollOutcome;
use oab_kiosk_auth::LifecycleState;
use oab_kiosk_remote::TransportError;
use oab_kiosk_ui::{SessionEndReason, UserMessage};

fn updates(h: &common::Harness) -> Vec<oab_kiosk_core::SessionUpdate> {
    h.api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ApiCall::Update(_, body) => Some(body),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_idle_without_session() {
    let h = harness(1_800);

    assert_eq!(h.controller.poll_once().await, PollOutcome::Idle);
    assert!(h.api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_active_session_keeps_running() {
    let h = harness(1_800);
    h.controller
        .login(&credentials())
        .await
        .expect("login should succeed");

    assert_eq!(h.controller.poll_once().await, PollOutcome::Active);
    assert!(h.controller.is_authenticated());
    assert_eq!(
        h.api
            .count(|call| matches!(call, ApiCall::Get(id) if *id == SESSION_ID)),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_inactive_without_end_is_stamped() {
    let h = harness(1_800);
    h.controller
        .login(&credentials())
        .await
        .expect("login should succeed");
    let mut ended = remote_session(false);
    ended.ends_at = None;
    h.api.set_get(Ok(ended));

    assert_eq!(h.controller.poll_once().await, PollOutcome::Ended);

    let updates = updates(&h);
    assert_eq!(updates.len(), 1);
    assert!(updates[0].final_de_sessao.is_some());
    assert_eq!(updates[0].ativado, None);
    assert_eq!(h.api.count(|call| matches!(call, ApiCall::Finalize(_))), 0);
    assert!(h.vault_is_empty());
    assert_eq!(h.controller.state(), LifecycleState::LoggedOut);
    assert_eq!(
        h.notifier.messages(),
        vec![UserMessage::session_ended_by_administrator()]
    );
    assert_eq!(
        h.bridge.events().last(),
        Some(&BridgeEvent::SessionEnded(SessionEndReason::EndedRemotely))
    );
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_inactive_with_end_is_not_stamped() {
    let h = harness(1_800);
    h.controller
        .login(&credentials())
        .await
        .expect("login should succeed");
    h.api.set_get(Ok(remote_session(false)));

    assert_eq!(h.controller.poll_once().await, PollOutcome::Ended);

    assert!(updates(&h).is_empty());
    assert!(h.vault_is_empty());
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_rejected_token_forces_logout() {
    let h = harness(1_800);
    h.controller
        .login(&credentials())
        .await
        .expect("login should succeed");
    h.api.set_get(Err(TransportError::http(
        401,
        Some("Sessão não ativa para este usuário".to_string()),
    )));

    assert_eq!(h.controller.poll_once().await, PollOutcome::Ended);

    assert!(updates(&h).is_empty());
    assert!(!h.controller.is_authenticated());
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_missing_session_stops_polling() {
    let h = harness(1_800);
    h.controller
        .login(&credentials())
        .await
        .expect("login should succeed");
    h.api.set_get(Err(TransportError::http(404, None)));

    tokio::time::sleep(Duration::from_secs(35)).await;

    assert_eq!(h.api.count(|call| matches!(call, ApiCall::Get(_))), 1);
    assert!(h.controller.is_authenticated());
    assert_eq!(h.controller.state(), LifecycleState::SessionActive);
    assert_eq!(h.bridge.events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_transient_failure_keeps_session() {
    let h = harness(1_800);
    h.controller
        .login(&credentials())
        .await
        .expect("login should succeed");
    h.api.set_get(Err(TransportError::http(503, None)));

    assert_eq!(h.controller.poll_once().await, PollOutcome::Transient);
    tokio::time::sleep(Duration::from_secs(21)).await;

    assert!(h.controller.is_authenticated());
    assert!(h.api.count(|call| matches!(call, ApiCall::Get(_))) >= 3);
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_never_overlaps_polls() {
    let h = harness(1_800);
    h.controller
        .login(&credentials())
        .await
        .expect("login should succeed");
    h.api.set_get_delay(Duration::from_secs(3));

    let (first, second) = tokio::join!(h.controller.poll_once(), h.controller.poll_once());

    let mut outcomes = [first, second];
    outcomes.sort_by_key(|outcome| *outcome == PollOutcome::Skipped);
    assert_eq!(outcomes, [PollOutcome::Active, PollOutcome::Skipped]);
    assert_eq!(h.api.max_concurrent_gets(), 1);
}

#[tokio::test(start_paused = true)]
async fn validity_poller_tests_background_poll_logs_out() {
    let h = harness(1_800);
    h.controller
        .login(&credentials())
        .await
        .expect("login should succeed");
    h.api.set_get(Ok(remote_session(false)));

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(h.controller.is_authenticated());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h.controller.is_authenticated());
    assert_eq!(h.api.count(|call| matches!(call, ApiCall::Get(_))), 1);
    assert!(h.vault_is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.api.count(|call| matches!(call, ApiCall::Get(_))), 1);
}
