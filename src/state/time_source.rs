//! Wall-clock abstraction so clocks, the registry and the sync loops can be driven by a
//! controllable source in tests.

use std::sync::{Arc, Mutex, PoisonError};

use time::{Duration, OffsetDateTime};

/// Source of "now" for every timer computation.
pub trait TimeSource: Send + Sync {
    /// Current wall-clock instant.
    fn now(&self) -> OffsetDateTime;
}

/// Shared handle to a time source.
pub type SharedTimeSource = Arc<dyn TimeSource>;

/// Production time source backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Time source that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualTimeSource {
    /// Start the manual clock at `start`.
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `seconds` (fractions allowed).
    pub fn advance_secs(&self, seconds: f64) {
        self.advance(Duration::seconds_f64(seconds));
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += delta;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new(OffsetDateTime::UNIX_EPOCH + Duration::days(20_000))
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_source_only_moves_when_advanced() {
        let source = ManualTimeSource::default();
        let first = source.now();
        assert_eq!(source.now(), first);

        source.advance_secs(2.5);
        assert_eq!(source.now() - first, Duration::milliseconds(2_500));
    }

    #[test]
    fn clones_share_the_same_instant() {
        let source = ManualTimeSource::default();
        let clone = source.clone();
        source.advance_secs(10.0);
        assert_eq!(source.now(), clone.now());
    }
}
