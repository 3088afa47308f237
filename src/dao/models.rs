use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::clock::{ClockPatch, ClockState, ClockStatus};

/// Default number of quarters when no event record describes the event.
pub const DEFAULT_TOTAL_QUARTERS: u32 = 4;
/// Default break between quarters, in minutes.
pub const DEFAULT_BREAK_LENGTH_MINUTES: f64 = 2.0;

/// Per-event timing settings stored with the event record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventSettingsEntity {
    /// Length of one quarter in minutes.
    pub quarter_length_minutes: f64,
    /// Break between quarters in minutes.
    pub break_length_minutes: f64,
    /// Number of quarters.
    pub total_quarters: u32,
}

impl EventSettingsEntity {
    /// Quarter length converted to seconds.
    pub fn quarter_length_seconds(&self) -> f64 {
        self.quarter_length_minutes * 60.0
    }
}

/// Event metadata record persisted next to the clock record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventEntity {
    /// Primary key of the event.
    pub id: Uuid,
    /// Display name of the first side.
    pub display_name_a: String,
    /// Display name of the second side.
    pub display_name_b: String,
    /// Score of the first side.
    pub score_a: i32,
    /// Score of the second side.
    pub score_b: i32,
    /// Quarter currently being played.
    pub current_quarter: u32,
    /// Lifecycle status mirrored from the clock.
    pub status: ClockStatus,
    /// Timing settings.
    pub settings: EventSettingsEntity,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last update timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl EventEntity {
    /// Build a default event record for a clock created without metadata.
    pub fn with_defaults(
        id: Uuid,
        quarter_length_seconds: f64,
        total_quarters: u32,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            display_name_a: "Home".into(),
            display_name_b: "Away".into(),
            score_a: 0,
            score_b: 0,
            current_quarter: 1,
            status: ClockStatus::Scheduled,
            settings: EventSettingsEntity {
                quarter_length_minutes: quarter_length_seconds / 60.0,
                break_length_minutes: DEFAULT_BREAK_LENGTH_MINUTES,
                total_quarters,
            },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable projection of a clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClockEntity {
    /// Owning event.
    pub event_id: Uuid,
    /// Whether the clock was counting down when written.
    pub is_running: bool,
    /// Start of the open run segment.
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Seconds consumed by closed run segments in the current quarter.
    pub accumulated_run_time_seconds: f64,
    /// 1-based quarter number.
    pub current_quarter: u32,
    /// Length of one quarter in seconds.
    pub quarter_length_seconds: f64,
    /// Lifecycle status.
    pub status: ClockStatus,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last update timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ClockEntity {
    /// Project a live clock state into a record.
    pub fn from_state(
        state: &ClockState,
        created_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> Self {
        Self {
            event_id: state.event_id,
            is_running: state.is_running,
            started_at: state.started_at,
            accumulated_run_time_seconds: state.accumulated_run_time_seconds,
            current_quarter: state.current_quarter,
            quarter_length_seconds: state.quarter_length_seconds,
            status: state.status,
            created_at,
            updated_at,
        }
    }
}

impl From<&ClockEntity> for ClockPatch {
    fn from(record: &ClockEntity) -> Self {
        Self {
            is_running: Some(record.is_running),
            started_at: Some(record.started_at),
            accumulated_run_time_seconds: Some(record.accumulated_run_time_seconds),
            quarter_length_seconds: Some(record.quarter_length_seconds),
            current_quarter: Some(record.current_quarter),
            status: Some(record.status),
        }
    }
}
