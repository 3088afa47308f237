//! Countdown clock for a single event split into fixed-length quarters.
//!
//! A [`GameClock`] knows nothing about storage or networking. Every mutation runs to
//! completion synchronously and then notifies the registered listeners with an immutable
//! [`ClockEvent`] snapshot. Remaining time is only ever derived through
//! [`remaining_seconds`].

use std::{
    error::Error,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::time_source::SharedTimeSource;

/// Identifier of the event owning a clock.
pub type EventId = Uuid;

/// Identifier handed out by [`GameClock::subscribe`].
pub type ListenerId = u64;

/// Result returned by clock listeners.
pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Callback invoked synchronously after every applied mutation.
pub type Listener = Arc<dyn Fn(&ClockEvent) -> ListenerResult + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&ClockEvent) -> ListenerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Lifecycle status of an event clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClockStatus {
    /// Not counting down; either never started, paused, or between quarters.
    Scheduled,
    /// Counting down.
    Live,
    /// Final quarter has been closed. Terminal.
    Finished,
}

/// Static per-event clock settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConfig {
    /// Length of one quarter in seconds.
    pub quarter_length_seconds: f64,
    /// Number of quarters in the event.
    pub total_quarters: u32,
}

impl ClockConfig {
    /// Build a configuration, forcing at least one quarter and a non-negative length.
    pub fn new(quarter_length_seconds: f64, total_quarters: u32) -> Self {
        Self {
            quarter_length_seconds: quarter_length_seconds.max(0.0),
            total_quarters: total_quarters.max(1),
        }
    }
}

/// Full mutable state of one event clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockState {
    /// Event this clock belongs to.
    pub event_id: EventId,
    /// Whether the clock is counting down right now.
    pub is_running: bool,
    /// Start of the current run segment; `None` while stopped.
    pub started_at: Option<OffsetDateTime>,
    /// Seconds already consumed in the current quarter by closed run segments.
    pub accumulated_run_time_seconds: f64,
    /// Length of one quarter in seconds.
    pub quarter_length_seconds: f64,
    /// 1-based quarter number.
    pub current_quarter: u32,
    /// Lifecycle status.
    pub status: ClockStatus,
}

impl ClockState {
    /// Initial state for a freshly created clock.
    pub fn initial(event_id: EventId, config: ClockConfig) -> Self {
        Self {
            event_id,
            is_running: false,
            started_at: None,
            accumulated_run_time_seconds: 0.0,
            quarter_length_seconds: config.quarter_length_seconds,
            current_quarter: 1,
            status: ClockStatus::Scheduled,
        }
    }

    /// Remaining seconds in the current quarter as seen at `now`.
    pub fn remaining_at(&self, now: OffsetDateTime) -> f64 {
        let started_at = if self.is_running {
            self.started_at
        } else {
            None
        };
        remaining_seconds(
            self.quarter_length_seconds,
            self.accumulated_run_time_seconds,
            started_at,
            now,
        )
    }
}

/// Remaining time in a quarter.
///
/// Stopped clocks (`started_at == None`) return the exact remainder; running clocks
/// subtract the open segment and round to a tenth of a second. Never negative.
pub fn remaining_seconds(
    quarter_length_seconds: f64,
    accumulated_run_time_seconds: f64,
    started_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> f64 {
    match started_at {
        None => (quarter_length_seconds - accumulated_run_time_seconds).max(0.0),
        Some(started_at) => {
            let elapsed = (now - started_at).as_seconds_f64();
            round_tenths(quarter_length_seconds - accumulated_run_time_seconds - elapsed).max(0.0)
        }
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Kind of mutation that produced a [`ClockEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClockEventKind {
    /// Countdown started or resumed.
    Start,
    /// Countdown paused, manually or because the quarter expired.
    Pause,
    /// Quarter advanced (or the event finished).
    NextQuarter,
    /// Current quarter reset.
    Reset,
    /// State overwritten from an external snapshot.
    Sync,
}

/// Who caused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClockEventSource {
    /// The single controlling client.
    Controller,
    /// The process-local registry (restores, expiry enforcement).
    Registry,
    /// A read-only observer.
    Observer,
}

/// Immutable snapshot emitted after every applied mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockEvent {
    /// Mutation kind.
    pub kind: ClockEventKind,
    /// When the mutation was applied.
    pub timestamp: OffsetDateTime,
    /// Owning event.
    pub event_id: EventId,
    /// State right after the mutation.
    pub resulting_state: ClockState,
    /// Who caused it.
    pub source: ClockEventSource,
}

/// Why a command left the clock untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// `start` while already counting down.
    AlreadyRunning,
    /// `pause` while stopped.
    NotRunning,
    /// `start` with no time left in the quarter.
    Expired,
    /// Any mutation after the final quarter closed.
    Finished,
    /// `sync` with a snapshot equal to the current state.
    Unchanged,
}

/// Result of a clock command. Ignored commands are not errors.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The state changed and listeners were notified.
    Applied,
    /// The command was a no-op.
    Ignored(IgnoreReason),
}

impl CommandOutcome {
    /// True when the command changed the state.
    pub fn is_applied(self) -> bool {
        matches!(self, CommandOutcome::Applied)
    }
}

/// Partial state used by [`GameClock::sync`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockPatch {
    /// Overwrites `is_running`.
    pub is_running: Option<bool>,
    /// Overwrites `started_at`; `Some(None)` clears it.
    pub started_at: Option<Option<OffsetDateTime>>,
    /// Overwrites `accumulated_run_time_seconds`.
    pub accumulated_run_time_seconds: Option<f64>,
    /// Overwrites `quarter_length_seconds`.
    pub quarter_length_seconds: Option<f64>,
    /// Overwrites `current_quarter`.
    pub current_quarter: Option<u32>,
    /// Overwrites `status`.
    pub status: Option<ClockStatus>,
}

impl From<&ClockState> for ClockPatch {
    fn from(state: &ClockState) -> Self {
        Self {
            is_running: Some(state.is_running),
            started_at: Some(state.started_at),
            accumulated_run_time_seconds: Some(state.accumulated_run_time_seconds),
            quarter_length_seconds: Some(state.quarter_length_seconds),
            current_quarter: Some(state.current_quarter),
            status: Some(state.status),
        }
    }
}

/// Read model derived from a clock at a given instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClockView {
    /// Owning event.
    #[schema(value_type = String, format = Uuid)]
    pub event_id: EventId,
    /// Remaining seconds in the current quarter.
    pub time_remaining: f64,
    /// Whether the clock is counting down.
    pub is_running: bool,
    /// 1-based quarter number.
    pub current_quarter: u32,
    /// Number of quarters in the event.
    pub total_quarters: u32,
    /// Lifecycle status.
    pub status: ClockStatus,
    /// No time left in the current quarter.
    pub is_expired: bool,
    /// Final quarter closed.
    pub is_game_finished: bool,
}

impl ClockView {
    /// Derive the read model of `state` as seen at `now`.
    pub fn at(state: &ClockState, total_quarters: u32, now: OffsetDateTime) -> Self {
        let time_remaining = state.remaining_at(now);
        Self {
            event_id: state.event_id,
            time_remaining,
            is_running: state.is_running,
            current_quarter: state.current_quarter,
            total_quarters,
            status: state.status,
            is_expired: time_remaining <= 0.0,
            is_game_finished: state.status == ClockStatus::Finished,
        }
    }
}

/// Countdown state machine for exactly one event.
pub struct GameClock {
    state: ClockState,
    total_quarters: u32,
    time: SharedTimeSource,
    listeners: IndexMap<ListenerId, Listener>,
    next_listener_id: ListenerId,
}

impl std::fmt::Debug for GameClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClock")
            .field("state", &self.state)
            .field("total_quarters", &self.total_quarters)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl GameClock {
    /// Create a stopped clock at the start of quarter 1.
    pub fn new(event_id: EventId, config: ClockConfig, time: SharedTimeSource) -> Self {
        Self {
            state: ClockState::initial(event_id, config),
            total_quarters: config.total_quarters,
            time,
            listeners: IndexMap::new(),
            next_listener_id: 0,
        }
    }

    /// Owning event.
    pub fn event_id(&self) -> EventId {
        self.state.event_id
    }

    /// Number of quarters configured for the event.
    pub fn total_quarters(&self) -> u32 {
        self.total_quarters
    }

    /// Borrow the current state.
    pub fn state(&self) -> &ClockState {
        &self.state
    }

    /// Current instant of the clock's time source.
    pub fn now(&self) -> OffsetDateTime {
        self.time.now()
    }

    /// Remaining seconds in the current quarter.
    pub fn current_time(&self) -> f64 {
        self.state.remaining_at(self.time.now())
    }

    /// No time left in the current quarter.
    pub fn is_expired(&self) -> bool {
        self.current_time() <= 0.0
    }

    /// Final quarter closed.
    pub fn is_game_finished(&self) -> bool {
        self.state.status == ClockStatus::Finished
    }

    /// Derive the read model at the current instant.
    pub fn view(&self) -> ClockView {
        ClockView::at(&self.state, self.total_quarters, self.time.now())
    }

    /// Register a listener; it is called after every applied mutation.
    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.insert(id, listener);
        id
    }

    /// Remove a listener. Returns false when the id was unknown.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.shift_remove(&id).is_some()
    }

    /// Start or resume the countdown.
    pub fn start(&mut self) -> CommandOutcome {
        if self.is_game_finished() {
            return self.ignore("start", IgnoreReason::Finished);
        }
        if self.state.is_running {
            return self.ignore("start", IgnoreReason::AlreadyRunning);
        }
        if self.is_expired() {
            return self.ignore("start", IgnoreReason::Expired);
        }

        self.state.is_running = true;
        self.state.started_at = Some(self.time.now());
        self.state.status = ClockStatus::Live;
        self.emit(ClockEventKind::Start, ClockEventSource::Controller)
    }

    /// Close the current run segment.
    pub fn pause(&mut self) -> CommandOutcome {
        if self.is_game_finished() {
            return self.ignore("pause", IgnoreReason::Finished);
        }
        if !self.state.is_running {
            return self.ignore("pause", IgnoreReason::NotRunning);
        }

        self.close_run_segment();
        self.emit(ClockEventKind::Pause, ClockEventSource::Controller)
    }

    /// Move to the next quarter, finishing the event after the last one.
    pub fn next_quarter(&mut self) -> CommandOutcome {
        if self.is_game_finished() {
            return self.ignore("next_quarter", IgnoreReason::Finished);
        }

        if self.state.current_quarter < self.total_quarters {
            self.state.current_quarter += 1;
            self.state.status = ClockStatus::Scheduled;
        } else {
            self.state.current_quarter = self.total_quarters;
            self.state.status = ClockStatus::Finished;
        }
        self.clear_run_fields();
        self.emit(ClockEventKind::NextQuarter, ClockEventSource::Controller)
    }

    /// Rewind the current quarter to its full length.
    pub fn reset(&mut self) -> CommandOutcome {
        if self.is_game_finished() {
            return self.ignore("reset", IgnoreReason::Finished);
        }

        self.clear_run_fields();
        self.state.status = ClockStatus::Scheduled;
        self.emit(ClockEventKind::Reset, ClockEventSource::Controller)
    }

    /// Shallow-merge `patch` into the state; notifies only when something changed.
    pub fn sync(&mut self, patch: ClockPatch, source: ClockEventSource) -> CommandOutcome {
        let mut next = self.state.clone();
        if let Some(is_running) = patch.is_running {
            next.is_running = is_running;
        }
        if let Some(started_at) = patch.started_at {
            next.started_at = started_at;
        }
        if let Some(accumulated) = patch.accumulated_run_time_seconds {
            next.accumulated_run_time_seconds = accumulated.max(0.0);
        }
        if let Some(length) = patch.quarter_length_seconds {
            next.quarter_length_seconds = length.max(0.0);
        }
        if let Some(quarter) = patch.current_quarter {
            next.current_quarter = quarter.clamp(1, self.total_quarters);
        }
        if let Some(status) = patch.status {
            next.status = status;
        }

        if next == self.state {
            return self.ignore("sync", IgnoreReason::Unchanged);
        }

        self.state = next;
        self.emit(ClockEventKind::Sync, source)
    }

    /// Stop a running clock whose quarter ran out.
    ///
    /// Emits a `pause` event attributed to the registry. Returns whether the clock was
    /// stopped.
    pub fn enforce_expiry(&mut self) -> bool {
        if !self.state.is_running || !self.is_expired() {
            return false;
        }

        self.close_run_segment();
        debug!(event_id = %self.state.event_id, "quarter expired; clock stopped");
        self.emit(ClockEventKind::Pause, ClockEventSource::Registry)
            .is_applied()
    }

    fn close_run_segment(&mut self) {
        let now = self.time.now();
        if let Some(started_at) = self.state.started_at.take() {
            let elapsed = (now - started_at).as_seconds_f64().max(0.0);
            self.state.accumulated_run_time_seconds = (self.state.accumulated_run_time_seconds
                + elapsed)
                .min(self.state.quarter_length_seconds);
        }
        self.state.is_running = false;
        self.state.status = ClockStatus::Scheduled;
    }

    fn clear_run_fields(&mut self) {
        self.state.is_running = false;
        self.state.started_at = None;
        self.state.accumulated_run_time_seconds = 0.0;
    }

    fn ignore(&self, command: &'static str, reason: IgnoreReason) -> CommandOutcome {
        debug!(
            event_id = %self.state.event_id,
            command,
            reason = ?reason,
            status = ?self.state.status,
            "clock command ignored"
        );
        CommandOutcome::Ignored(reason)
    }

    fn emit(&self, kind: ClockEventKind, source: ClockEventSource) -> CommandOutcome {
        let event = ClockEvent {
            kind,
            timestamp: self.time.now(),
            event_id: self.state.event_id,
            resulting_state: self.state.clone(),
            source,
        };

        for (id, listener) in &self.listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    event_id = %event.event_id,
                    listener = id,
                    kind = ?event.kind,
                    error = %err,
                    "clock listener failed"
                ),
                Err(_) => warn!(
                    event_id = %event.event_id,
                    listener = id,
                    kind = ?event.kind,
                    "clock listener panicked"
                ),
            }
        }

        CommandOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use time::Duration;

    use super::*;
    use crate::state::time_source::{ManualTimeSource, TimeSource};

    fn clock(quarter_length: f64, total_quarters: u32) -> (GameClock, ManualTimeSource) {
        let time = ManualTimeSource::default();
        let clock = GameClock::new(
            Uuid::new_v4(),
            ClockConfig::new(quarter_length, total_quarters),
            Arc::new(time.clone()),
        );
        (clock, time)
    }

    fn recorder(clock: &mut GameClock) -> Arc<Mutex<Vec<ClockEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        clock.subscribe(listener(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        }));
        events
    }

    #[test]
    fn fresh_clock_reports_full_quarter() {
        let (clock, _) = clock(900.0, 4);
        assert_eq!(clock.current_time(), 900.0);
        assert_eq!(clock.state().status, ClockStatus::Scheduled);
        assert_eq!(clock.state().current_quarter, 1);
        assert!(!clock.is_expired());
    }

    #[test]
    fn start_pause_cycles_accumulate_running_time() {
        let (mut clock, time) = clock(60.0, 4);

        assert!(clock.start().is_applied());
        assert_eq!(clock.state().status, ClockStatus::Live);
        time.advance_secs(10.0);
        assert!(clock.pause().is_applied());
        assert_eq!(clock.current_time(), 50.0);

        assert!(clock.start().is_applied());
        time.advance_secs(5.0);
        assert!(clock.pause().is_applied());
        assert_eq!(clock.current_time(), 45.0);
        assert_eq!(clock.state().accumulated_run_time_seconds, 15.0);
    }

    #[test]
    fn running_time_is_rounded_to_tenths() {
        let (mut clock, time) = clock(60.0, 4);
        let _ = clock.start();
        time.advance(Duration::milliseconds(1_234));
        assert_eq!(clock.current_time(), 58.8);
    }

    #[test]
    fn paused_clock_does_not_move() {
        let (mut clock, time) = clock(60.0, 4);
        let _ = clock.start();
        time.advance_secs(12.0);
        let _ = clock.pause();

        let frozen = clock.current_time();
        time.advance_secs(3_600.0);
        assert_eq!(clock.current_time(), frozen);
    }

    #[test]
    fn double_start_and_double_pause_are_ignored() {
        let (mut clock, time) = clock(60.0, 4);
        let events = recorder(&mut clock);

        let _ = clock.start();
        let after_first = clock.state().clone();
        time.advance_secs(1.0);
        assert_eq!(
            clock.start(),
            CommandOutcome::Ignored(IgnoreReason::AlreadyRunning)
        );
        assert_eq!(clock.state(), &after_first);

        let _ = clock.pause();
        let paused = clock.state().clone();
        assert_eq!(clock.pause(), CommandOutcome::Ignored(IgnoreReason::NotRunning));
        assert_eq!(clock.state(), &paused);

        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn reset_twice_matches_reset_once() {
        let (mut clock, time) = clock(60.0, 4);
        let _ = clock.start();
        time.advance_secs(20.0);
        let _ = clock.reset();
        let once = clock.state().clone();
        let _ = clock.reset();
        assert_eq!(clock.state(), &once);
        assert_eq!(clock.current_time(), 60.0);
        assert_eq!(clock.state().status, ClockStatus::Scheduled);
    }

    #[test]
    fn expired_clock_cannot_start_and_is_stopped_on_enforcement() {
        let (mut clock, time) = clock(5.0, 4);
        let _ = clock.start();
        time.advance_secs(6.0);

        assert!(clock.is_expired());
        assert_eq!(clock.current_time(), 0.0);
        assert!(clock.enforce_expiry());
        assert!(!clock.state().is_running);
        assert_eq!(clock.state().status, ClockStatus::Scheduled);
        assert_eq!(clock.state().accumulated_run_time_seconds, 5.0);
        assert_eq!(clock.start(), CommandOutcome::Ignored(IgnoreReason::Expired));
        assert!(!clock.enforce_expiry());
    }

    #[test]
    fn quarters_are_bounded_and_finish_the_event() {
        let (mut clock, _) = clock(900.0, 4);
        let events = recorder(&mut clock);

        for _ in 0..4 {
            let _ = clock.next_quarter();
        }
        assert_eq!(clock.state().status, ClockStatus::Finished);
        assert_eq!(clock.state().current_quarter, 4);
        assert!(clock.is_game_finished());

        for _ in 0..3 {
            assert_eq!(
                clock.next_quarter(),
                CommandOutcome::Ignored(IgnoreReason::Finished)
            );
        }
        assert_eq!(clock.state().current_quarter, 4);
        assert_eq!(events.lock().unwrap().len(), 4);
    }

    #[test]
    fn finished_clock_rejects_every_command_but_sync() {
        let (mut clock, _) = clock(60.0, 1);
        let _ = clock.next_quarter();
        assert!(clock.is_game_finished());

        assert!(!clock.start().is_applied());
        assert!(!clock.pause().is_applied());
        assert!(!clock.reset().is_applied());
        assert!(
            clock
                .sync(
                    ClockPatch {
                        status: Some(ClockStatus::Scheduled),
                        ..ClockPatch::default()
                    },
                    ClockEventSource::Registry,
                )
                .is_applied()
        );
    }

    #[test]
    fn next_quarter_clears_run_fields() {
        let (mut clock, time) = clock(60.0, 4);
        let _ = clock.start();
        time.advance_secs(30.0);
        let _ = clock.next_quarter();

        let state = clock.state();
        assert_eq!(state.current_quarter, 2);
        assert!(!state.is_running);
        assert!(state.started_at.is_none());
        assert_eq!(state.accumulated_run_time_seconds, 0.0);
        assert_eq!(clock.current_time(), 60.0);
    }

    #[test]
    fn sync_restores_a_running_snapshot() {
        let (mut clock, time) = clock(900.0, 4);
        let started_at = time.now() - Duration::seconds(300);

        let outcome = clock.sync(
            ClockPatch {
                is_running: Some(true),
                started_at: Some(Some(started_at)),
                accumulated_run_time_seconds: Some(0.0),
                status: Some(ClockStatus::Live),
                ..ClockPatch::default()
            },
            ClockEventSource::Registry,
        );

        assert!(outcome.is_applied());
        assert!((clock.current_time() - 600.0).abs() <= 0.1);
    }

    #[test]
    fn sync_with_identical_state_is_silent() {
        let (mut clock, _) = clock(900.0, 4);
        let events = recorder(&mut clock);
        let patch = ClockPatch::from(clock.state());

        assert_eq!(
            clock.sync(patch, ClockEventSource::Registry),
            CommandOutcome::Ignored(IgnoreReason::Unchanged)
        );
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_listeners_do_not_stop_notification() {
        let (mut clock, _) = clock(60.0, 4);
        clock.subscribe(listener(|_| Err("boom".into())));
        clock.subscribe(listener(|_| panic!("listener panic")));
        let events = recorder(&mut clock);

        assert!(clock.start().is_applied());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ClockEventKind::Start);
        assert_eq!(events[0].source, ClockEventSource::Controller);
        assert!(events[0].resulting_state.is_running);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let (mut clock, _) = clock(60.0, 4);
        let events = Arc::new(Mutex::new(0));
        let sink = events.clone();
        let id = clock.subscribe(listener(move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        }));

        assert!(clock.unsubscribe(id));
        assert!(!clock.unsubscribe(id));
        let _ = clock.start();
        assert_eq!(*events.lock().unwrap(), 0);
    }
}
