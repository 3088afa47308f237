use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::clock::{ClockEvent, ClockEventKind, ClockEventSource, ClockStatus};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already encoded payload.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a durable store.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast after every applied clock mutation.
pub struct ClockUpdateEvent {
    pub event_id: Uuid,
    pub kind: ClockEventKind,
    pub source: ClockEventSource,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_running: bool,
    pub current_quarter: u32,
    pub status: ClockStatus,
    /// Remaining seconds at `timestamp`.
    pub time_remaining: f64,
}

impl From<&ClockEvent> for ClockUpdateEvent {
    fn from(event: &ClockEvent) -> Self {
        let state = &event.resulting_state;
        Self {
            event_id: event.event_id,
            kind: event.kind,
            source: event.source,
            timestamp: event.timestamp,
            is_running: state.is_running,
            current_quarter: state.current_quarter,
            status: state.status,
            time_remaining: state.remaining_at(event.timestamp),
        }
    }
}
