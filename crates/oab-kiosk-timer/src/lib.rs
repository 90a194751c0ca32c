#![warn(missing_docs)]
//! # oab-kiosk-timer
//!
//! ## Purpose
//! Owns the single source of truth for the remaining session time.
//!
//! ## Responsibilities
//! - Step the countdown one second at a time ([`Countdown`], pure).
//! - Drive it from a tokio interval and publish ticks, threshold
//!   notifications and the expiry signal ([`CountdownTimer`]).
//! - Guarantee that no tick is applied after `stop()` returns.
//!
//! ## Data flow
//! `start` -> interval tick -> [`Countdown::advance`] -> [`TimerEvent`]s on
//! the per-run channel and the remaining seconds on a `watch` stream ->
//! controller and overlay.
//!
//! ## Ownership and lifetimes
//! [`TimerState`] lives behind the timer's mutex and is only mutated by the
//! tick task and by `start`/`stop`. Readers receive clones or the `watch`
//! stream.
//!
//! ## Error model
//! Only settings validation can fail ([`TimerError`]). Runtime operations are
//! infallible and idempotent.
//!
//! ## Security and privacy notes
//! The session holder's name and registration are kept in memory only.
//!
//! ## Example
//! ```rust
//! use oab_kiosk_timer::{Countdown, SessionHolder, TimerEvent};
//!
//! let mut countdown = Countdown::default();
//! countdown.start(2, SessionHolder::new("Maria", "123456"));
//! assert_eq!(countdown.advance(), vec![TimerEvent::Tick(1)]);
//! assert_eq!(countdown.advance(), vec![TimerEvent::Tick(0), TimerEvent::Expired]);
//! assert!(!countdown.state().is_active);
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Minutes-remaining marks that trigger one notification each.
pub const DEFAULT_THRESHOLD_MINUTES: [u64; 3] = [5, 3, 1];

/// Who the running countdown belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHolder {
    /// Display name.
    pub name: String,
    /// Registration number.
    pub id: String,
}

impl SessionHolder {
    /// Creates a holder.
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// Events published by the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// New remaining seconds after one tick.
    Tick(u64),
    /// Remaining time reached this many whole minutes.
    Threshold(u64),
    /// Remaining time reached zero; the countdown has stopped.
    Expired,
}

/// Countdown snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerState {
    /// Seconds left.
    pub remaining_seconds: u64,
    /// Seconds the current run started with.
    pub total_seconds: u64,
    /// Whether a run is in progress.
    pub is_active: bool,
    /// Threshold minutes already notified in this run.
    pub notified_thresholds: BTreeSet<u64>,
    /// Owner of the current run.
    pub holder: Option<SessionHolder>,
}

/// Pure one-second-resolution countdown.
#[derive(Debug, Clone)]
pub struct Countdown {
    state: TimerState,
    thresholds: Vec<u64>,
}

impl Countdown {
    /// Creates a stopped countdown notifying at `threshold_minutes`.
    ///
    /// Zero and duplicate marks are ignored; marks fire in descending order.
    pub fn new(threshold_minutes: &[u64]) -> Self {
        let mut thresholds: Vec<u64> = threshold_minutes
            .iter()
            .copied()
            .filter(|minutes| *minutes > 0)
            .collect();
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();

        Self {
            state: TimerState::default(),
            thresholds,
        }
    }

    /// Resets and starts a run of `total_seconds`.
    ///
    /// A zero-length run leaves the countdown stopped.
    pub fn start(&mut self, total_seconds: u64, holder: SessionHolder) {
        self.stop();
        if total_seconds == 0 {
            return;
        }
        self.state = TimerState {
            remaining_seconds: total_seconds,
            total_seconds,
            is_active: true,
            notified_thresholds: BTreeSet::new(),
            holder: Some(holder),
        };
    }

    /// Stops the run and clears remaining time, holder and threshold memory.
    pub fn stop(&mut self) {
        self.state = TimerState::default();
    }

    /// Applies one tick and returns the events it produced.
    ///
    /// # Semantics
    /// - `Tick(n)` is always first.
    /// - A mark fires once, on the first tick at or below `mark * 60`
    ///   seconds, and only if the run started above it.
    /// - `Expired` is last and is followed by an implicit [`Self::stop`].
    pub fn advance(&mut self) -> Vec<TimerEvent> {
        if !self.state.is_active {
            return Vec::new();
        }

        let remaining = self.state.remaining_seconds.saturating_sub(1);
        self.state.remaining_seconds = remaining;
        let mut events = vec![TimerEvent::Tick(remaining)];

        for &minutes in &self.thresholds {
            let mark = minutes.saturating_mul(60);
            if self.state.total_seconds > mark
                && remaining <= mark
                && self.state.notified_thresholds.insert(minutes)
            {
                events.push(TimerEvent::Threshold(minutes));
            }
        }

        if remaining == 0 {
            events.push(TimerEvent::Expired);
            self.stop();
        }

        events
    }

    /// Returns the current snapshot.
    pub fn state(&self) -> &TimerState {
        &self.state
    }
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new(&DEFAULT_THRESHOLD_MINUTES)
    }
}

/// Timer cadence and notification marks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSettings {
    /// Wall-clock duration of one countdown second.
    pub tick_period: Duration,
    /// Minutes-remaining notification marks.
    pub threshold_minutes: Vec<u64>,
}

impl TimerSettings {
    /// Creates validated settings.
    ///
    /// # Errors
    /// Returns [`TimerError::InvalidTickPeriod`] for a zero period.
    pub fn new(tick_period: Duration, threshold_minutes: Vec<u64>) -> Result<Self, TimerError> {
        if tick_period.is_zero() {
            return Err(TimerError::InvalidTickPeriod);
        }
        Ok(Self {
            tick_period,
            threshold_minutes,
        })
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            threshold_minutes: DEFAULT_THRESHOLD_MINUTES.to_vec(),
        }
    }
}

/// Receiver for the events of one run; closes when the run ends.
pub type TimerEvents = mpsc::UnboundedReceiver<TimerEvent>;

struct Run {
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TimerEvent>,
}

struct Shared {
    countdown: Countdown,
    run: Option<Run>,
    remaining: watch::Sender<u64>,
}

impl Shared {
    fn halt(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
        }
        self.countdown.stop();
        self.remaining.send_replace(0);
    }
}

enum TickOutcome {
    Continue,
    Finished,
}

/// Async countdown driven by a tokio interval.
#[derive(Clone)]
pub struct CountdownTimer {
    shared: Arc<Mutex<Shared>>,
    tick_period: Duration,
}

impl CountdownTimer {
    /// Creates a stopped timer with default settings.
    pub fn new() -> Self {
        Self::with_settings(TimerSettings::default())
    }

    /// Creates a stopped timer.
    pub fn with_settings(settings: TimerSettings) -> Self {
        let (remaining, _) = watch::channel(0);
        Self {
            shared: Arc::new(Mutex::new(Shared {
                countdown: Countdown::new(&settings.threshold_minutes),
                run: None,
                remaining,
            })),
            tick_period: settings.tick_period,
        }
    }

    /// Starts a run, superseding any run in progress.
    ///
    /// Must be called inside a tokio runtime. The returned receiver yields
    /// this run's events and closes once the run stops or expires. A
    /// zero-length run returns an already closed receiver.
    pub fn start(&self, total_seconds: u64, holder: SessionHolder) -> TimerEvents {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut shared = self.lock();
        shared.halt();
        shared.countdown.start(total_seconds, holder);
        if !shared.countdown.state().is_active {
            return events_rx;
        }

        let cancel = CancellationToken::new();
        shared.run = Some(Run {
            cancel: cancel.clone(),
            events: events_tx,
        });
        shared.remaining.send_replace(total_seconds);
        drop(shared);

        debug!(stage = "timer", action = "start", total_seconds);
        let state = Arc::clone(&self.shared);
        let period = self.tick_period;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let TickOutcome::Finished = apply_tick(&state, &cancel) {
                    break;
                }
            }
        });

        events_rx
    }

    /// Cancels the run and zeroes the state. Safe to call when stopped.
    pub fn stop(&self) {
        self.lock().halt();
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> TimerState {
        self.lock().countdown.state().clone()
    }

    /// Returns `true` while a run is in progress.
    pub fn is_active(&self) -> bool {
        self.lock().countdown.state().is_active
    }

    /// Subscribes to the published remaining-seconds stream.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.lock().remaining.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Every critical section leaves `Shared` consistent, so a poisoned
        // lock still holds valid state.
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies one tick under the lock. Cancellation is re-checked under the
/// same lock `stop` takes, so a stopped run never advances.
fn apply_tick(shared: &Mutex<Shared>, cancel: &CancellationToken) -> TickOutcome {
    let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
    if cancel.is_cancelled() {
        return TickOutcome::Finished;
    }

    let events = shared.countdown.advance();
    let remaining = shared.countdown.state().remaining_seconds;
    shared.remaining.send_replace(remaining);

    let expired = events.contains(&TimerEvent::Expired);
    if let Some(run) = &shared.run {
        for event in events {
            // A dropped receiver only means nobody listens to this run.
            let _ = run.events.send(event);
        }
    }

    if expired {
        debug!(stage = "timer", action = "expired");
        shared.run = None;
        return TickOutcome::Finished;
    }
    TickOutcome::Continue
}

/// Timer settings errors.
#[derive(Debug, Error)]
pub enum TimerError {
    /// Tick period must be positive.
    #[error("tick period must be greater than zero")]
    InvalidTickPeriod,
}

#[cfg(test)]
mod tests {
    //! Unit tests for countdown stepping.

    use super::*;

    fn holder() -> SessionHolder {
        SessionHolder::new("Maria Souza", "123456")
    }

    #[test]
    fn expiry_fires_once_on_final_tick() {
        let mut countdown = Countdown::default();
        countdown.start(300, holder());

        let mut expired_at = Vec::new();
        for tick in 1..=300 {
            if countdown.advance().contains(&TimerEvent::Expired) {
                expired_at.push(tick);
            }
        }

        assert_eq!(expired_at, vec![300]);
        assert!(countdown.advance().is_empty());
        assert_eq!(countdown.state().remaining_seconds, 0);
        assert_eq!(countdown.state().holder, None);
    }

    #[test]
    fn thresholds_fire_once_in_descending_order() {
        let mut countdown = Countdown::default();
        countdown.start(301, holder());

        let mut thresholds = Vec::new();
        for _ in 0..301 {
            for event in countdown.advance() {
                if let TimerEvent::Threshold(minutes) = event {
                    thresholds.push(minutes);
                }
            }
        }

        assert_eq!(thresholds, vec![5, 3, 1]);
    }

    #[test]
    fn restart_below_a_mark_skips_it() {
        let mut countdown = Countdown::default();
        countdown.start(400, holder());
        for _ in 0..100 {
            countdown.advance();
        }
        assert!(countdown.state().notified_thresholds.contains(&5));

        countdown.start(250, holder());
        let mut thresholds = Vec::new();
        for _ in 0..250 {
            for event in countdown.advance() {
                if let TimerEvent::Threshold(minutes) = event {
                    thresholds.push(minutes);
                }
            }
        }
        assert_eq!(thresholds, vec![3, 1]);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut countdown = Countdown::default();
        countdown.start(30, holder());
        countdown.stop();
        countdown.stop();

        assert_eq!(countdown.state().remaining_seconds, 0);
        assert!(!countdown.state().is_active);
    }

    #[test]
    fn zero_length_run_stays_stopped() {
        let mut countdown = Countdown::default();
        countdown.start(0, holder());
        assert!(!countdown.state().is_active);
        assert!(countdown.advance().is_empty());
    }

    #[test]
    fn settings_reject_zero_period() {
        assert!(TimerSettings::new(Duration::ZERO, vec![5]).is_err());
    }
}
