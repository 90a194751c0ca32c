//! Integration tests for the interval-driven countdown timer.

use std::time::Duration;

use oab_kiosk_timer::{CountdownTimer, SessionHolder, TimerEvent, TimerEvents};

fn holder() -> SessionHolder {
    SessionHolder::new("Maria Souza", "123456")
}

async fn drain(mut events: TimerEvents) -> Vec<TimerEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn timer_runtime_tests_emits_single_expiry_after_full_run() {
    let timer = CountdownTimer::new();
    let events = timer.start(300, holder());

    let seen = drain(events).await;

    let expired: Vec<usize> = seen
        .iter()
        .enumerate()
        .filter(|(_, event)| **event == TimerEvent::Expired)
        .map(|(index, _)| index)
        .collect();
    assert_eq!(expired, vec![seen.len() - 1]);
    assert_eq!(
        seen.iter()
            .filter(|event| matches!(event, TimerEvent::Tick(_)))
            .count(),
        300
    );
    assert!(!timer.is_active());
    assert_eq!(*timer.subscribe().borrow(), 0);
}

#[tokio::test(start_paused = true)]
async fn timer_runtime_tests_notifies_each_threshold_once() {
    let timer = CountdownTimer::new();
    let seen = drain(timer.start(301, holder())).await;

    let thresholds: Vec<u64> = seen
        .iter()
        .filter_map(|event| match event {
            TimerEvent::Threshold(minutes) => Some(*minutes),
            _ => None,
        })
        .collect();
    assert_eq!(thresholds, vec![5, 3, 1]);
}

#[tokio::test(start_paused = true)]
async fn timer_runtime_tests_stop_twice_leaves_zero() {
    let timer = CountdownTimer::new();
    let _events = timer.start(60, holder());
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(timer.snapshot().remaining_seconds, 58);

    timer.stop();
    timer.stop();

    let state = timer.snapshot();
    assert_eq!(state.remaining_seconds, 0);
    assert!(!state.is_active);
    assert_eq!(*timer.subscribe().borrow(), 0);
}

#[tokio::test(start_paused = true)]
async fn timer_runtime_tests_delivers_no_tick_after_stop() {
    let timer = CountdownTimer::new();
    let mut events = timer.start(60, holder());
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(events.recv().await, Some(TimerEvent::Tick(59)));

    timer.stop();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(events.recv().await, None);
    assert_eq!(timer.snapshot().remaining_seconds, 0);
}

#[tokio::test(start_paused = true)]
async fn timer_runtime_tests_restart_closes_previous_run() {
    let timer = CountdownTimer::new();
    let first = timer.start(120, holder());
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let mut second = timer.start(30, SessionHolder::new("João Lima", "654321"));
    assert_eq!(drain(first).await, vec![TimerEvent::Tick(119)]);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(second.recv().await, Some(TimerEvent::Tick(29)));
    assert_eq!(
        timer.snapshot().holder.map(|holder| holder.id),
        Some("654321".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn timer_runtime_tests_publishes_remaining_seconds() {
    let timer = CountdownTimer::new();
    let mut remaining = timer.subscribe();
    let _events = timer.start(10, holder());
    assert_eq!(*remaining.borrow_and_update(), 10);

    remaining.changed().await.expect("sender alive");
    assert_eq!(*remaining.borrow_and_update(), 9);
}
