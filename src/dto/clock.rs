use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::ServiceError,
    state::{
        clock::{ClockPatch, ClockStatus},
        registry::MemoryStats,
    },
};

/// Payload creating the clock (and default event record) of an event.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateClockRequest {
    /// Identifier to use; a fresh one is generated when omitted.
    #[serde(default)]
    pub event_id: Option<Uuid>,
    /// Length of one quarter in seconds.
    #[validate(range(min = 1.0))]
    pub quarter_length_seconds: f64,
    /// Number of quarters.
    #[validate(range(min = 1, max = 16))]
    pub total_quarters: u32,
    /// Display name of the first side.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub display_name_a: Option<String>,
    /// Display name of the second side.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub display_name_b: Option<String>,
}

/// Partial clock state pushed by a controller; omitted fields are left untouched.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SyncClockRequest {
    /// Whether the clock is counting down.
    #[serde(default)]
    pub is_running: Option<bool>,
    /// Start of the open run segment in Unix milliseconds.
    /// If not specified, does not change it. If null is specified, clears it.
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<i64>)]
    pub started_at_ms: Option<Option<i64>>,
    /// Seconds consumed in the current quarter by closed run segments.
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub accumulated_run_time_seconds: Option<f64>,
    /// Length of one quarter in seconds.
    #[serde(default)]
    #[validate(range(min = 1.0))]
    pub quarter_length_seconds: Option<f64>,
    /// 1-based quarter number.
    #[serde(default)]
    #[validate(range(min = 1, max = 16))]
    pub current_quarter: Option<u32>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: Option<ClockStatus>,
}

impl SyncClockRequest {
    /// Convert into a clock patch, rejecting timestamps outside the supported range.
    pub fn into_patch(self) -> Result<ClockPatch, ServiceError> {
        let started_at = match self.started_at_ms {
            None => None,
            Some(None) => Some(None),
            Some(Some(millis)) => {
                let instant =
                    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
                        .map_err(|err| {
                            ServiceError::InvalidInput(format!("startedAtMs out of range: {err}"))
                        })?;
                Some(Some(instant))
            }
        };

        Ok(ClockPatch {
            is_running: self.is_running,
            started_at,
            accumulated_run_time_seconds: self.accumulated_run_time_seconds,
            quarter_length_seconds: self.quarter_length_seconds,
            current_quarter: self.current_quarter,
            status: self.status,
        })
    }
}

/// Registry and persistence statistics.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClockStatsResponse {
    /// Registry occupancy, flattened into the response.
    #[serde(flatten)]
    pub memory: MemoryStats,
    /// Local changes not yet confirmed durable.
    pub pending_writes: usize,
    /// Whether the durable store is unreachable.
    pub degraded: bool,
    /// Interval at which controllers should re-fetch authoritative state, in seconds.
    pub controller_poll_interval_seconds: f64,
    /// Interval at which observers should poll, in seconds.
    pub observer_poll_interval_seconds: f64,
}
