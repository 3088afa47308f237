use tracing::debug;

use crate::state::{
    clock::{
        ClockConfig, ClockEventSource, ClockPatch, ClockView, CommandOutcome, EventId, GameClock,
    },
    time_source::SharedTimeSource,
};

/// Mutating command issued by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start or resume the countdown.
    Start,
    /// Pause the countdown.
    Pause,
    /// Advance to the next quarter.
    NextQuarter,
    /// Rewind the current quarter.
    Reset,
}

impl ControlCommand {
    /// Apply the command to `clock`.
    pub fn apply(self, clock: &mut GameClock) -> CommandOutcome {
        match self {
            ControlCommand::Start => clock.start(),
            ControlCommand::Pause => clock.pause(),
            ControlCommand::NextQuarter => clock.next_quarter(),
            ControlCommand::Reset => clock.reset(),
        }
    }
}

/// The single controlling client of an event, with a local zero-latency mirror.
pub struct Controller {
    mirror: GameClock,
}

impl Controller {
    /// Create a controller mirroring a fresh clock with `config`.
    pub fn new(event_id: EventId, config: ClockConfig, time: SharedTimeSource) -> Self {
        Self {
            mirror: GameClock::new(event_id, config, time),
        }
    }

    /// Event this controller drives.
    pub fn event_id(&self) -> EventId {
        self.mirror.event_id()
    }

    /// Apply a command to the local mirror ahead of the authoritative round-trip.
    pub fn issue(&mut self, command: ControlCommand) -> CommandOutcome {
        self.mirror.enforce_expiry();
        command.apply(&mut self.mirror)
    }

    /// Display value of the local mirror.
    pub fn display(&self) -> ClockView {
        self.mirror.view()
    }

    /// Adopt the authoritative snapshot when its `status` or `is_running` disagree with
    /// the mirror. Timing fields alone never trigger adoption.
    ///
    /// Returns whether the mirror was overwritten.
    pub fn reconcile(&mut self, authoritative: &ClockView) -> bool {
        let local = self.mirror.state();
        if local.status == authoritative.status && local.is_running == authoritative.is_running
        {
            return false;
        }

        let quarter_length = local.quarter_length_seconds;
        let now = self.mirror.now();
        let patch = ClockPatch {
            is_running: Some(authoritative.is_running),
            started_at: Some(authoritative.is_running.then_some(now)),
            accumulated_run_time_seconds: Some(
                (quarter_length - authoritative.time_remaining).clamp(0.0, quarter_length),
            ),
            quarter_length_seconds: None,
            current_quarter: Some(authoritative.current_quarter),
            status: Some(authoritative.status),
        };
        debug!(
            event_id = %self.mirror.event_id(),
            status = ?authoritative.status,
            is_running = authoritative.is_running,
            "controller adopting authoritative state"
        );
        self.mirror
            .sync(patch, ClockEventSource::Controller)
            .is_applied()
    }
}
