use serde::Serialize;
use utoipa::ToSchema;

use crate::state::registry::MemoryStats;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Local changes not yet confirmed durable.
    pub pending_writes: usize,
    /// Registry occupancy.
    pub registry: MemoryStats,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(pending_writes: usize, registry: MemoryStats) -> Self {
        Self {
            status: "ok".to_string(),
            pending_writes,
            registry,
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(pending_writes: usize, registry: MemoryStats) -> Self {
        Self {
            status: "degraded".to_string(),
            pending_writes,
            registry,
        }
    }
}
