use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness, pinging the durable store and logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    if let Err(err) = state.persistence().health_check().await {
        warn!(error = %err, "storage health check failed");
    }

    let pending_writes = state.persistence().pending_writes();
    let registry = state.registry().memory_stats();
    if state.is_degraded() {
        HealthResponse::degraded(pending_writes, registry)
    } else {
        HealthResponse::ok(pending_writes, registry)
    }
}
