use std::sync::Arc;

use tracing::warn;

use crate::{
    dto::sse::{ClockUpdateEvent, ServerEvent, SystemStatus},
    state::{
        SseHub,
        clock::{Listener, listener},
    },
};

const EVENT_CLOCK_UPDATE: &str = "clock.update";
const EVENT_SYSTEM_STATUS: &str = "system_status";

/// Clock listener forwarding every applied mutation to `hub`.
pub fn clock_listener(hub: Arc<SseHub>) -> Listener {
    listener(move |event| {
        if hub.subscriber_count() == 0 {
            return Ok(());
        }
        let payload = ClockUpdateEvent::from(event);
        let event = ServerEvent::json(Some(EVENT_CLOCK_UPDATE.to_string()), &payload)?;
        hub.broadcast(event);
        Ok(())
    })
}

/// Broadcast the degraded flag to the clock stream.
pub fn broadcast_system_status(hub: &SseHub, degraded: bool) {
    match ServerEvent::json(
        Some(EVENT_SYSTEM_STATUS.to_string()),
        &SystemStatus { degraded },
    ) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(error = %err, "failed to serialize system status"),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::state::{
        clock::{ClockConfig, GameClock},
        time_source::ManualTimeSource,
    };

    #[test]
    fn clock_mutations_reach_subscribers() {
        let hub = Arc::new(SseHub::new(8));
        let mut receiver = hub.subscribe();
        let mut clock = GameClock::new(
            Uuid::new_v4(),
            ClockConfig::new(60.0, 4),
            Arc::new(ManualTimeSource::default()),
        );
        clock.subscribe(clock_listener(hub.clone()));

        assert!(clock.start().is_applied());
        let event = receiver.try_recv().unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_CLOCK_UPDATE));
        let payload: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(payload["kind"], "start");
        assert_eq!(payload["isRunning"], true);
        assert_eq!(payload["timeRemaining"], 60.0);
    }

    #[test]
    fn system_status_is_tagged() {
        let hub = SseHub::new(8);
        let mut receiver = hub.subscribe();
        broadcast_system_status(&hub, true);
        let event = receiver.try_recv().unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_SYSTEM_STATUS));
        assert_eq!(event.data, r#"{"degraded":true}"#);
    }
}
