use time::OffsetDateTime;

use crate::state::{
    clock::{ClockView, remaining_seconds},
    time_source::SharedTimeSource,
};

struct Seed {
    view: ClockView,
    received_at: OffsetDateTime,
}

/// Read-only display state of an observer.
///
/// Never runs transition logic: it keeps the last authoritative snapshot and
/// extrapolates the remaining time from it between polls.
pub struct Observer {
    seed: Option<Seed>,
    time: SharedTimeSource,
}

impl Observer {
    /// Create an observer with nothing to display yet.
    pub fn new(time: SharedTimeSource) -> Self {
        Self { seed: None, time }
    }

    /// Adopt an authoritative snapshot verbatim, discarding any extrapolation.
    pub fn apply(&mut self, view: ClockView) {
        self.seed = Some(Seed {
            view,
            received_at: self.time.now(),
        });
    }

    /// Last authoritative snapshot, as received.
    pub fn last_snapshot(&self) -> Option<&ClockView> {
        self.seed.as_ref().map(|seed| &seed.view)
    }

    /// Display value right now: the last snapshot with its remaining time extrapolated.
    pub fn display(&self) -> Option<ClockView> {
        let seed = self.seed.as_ref()?;
        let started_at = seed.view.is_running.then_some(seed.received_at);
        let time_remaining =
            remaining_seconds(seed.view.time_remaining, 0.0, started_at, self.time.now());

        Some(ClockView {
            time_remaining,
            is_expired: time_remaining <= 0.0,
            ..seed.view.clone()
        })
    }
}
