use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quarter clock backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::clock_stream,
        crate::routes::clock::create_clock,
        crate::routes::clock::get_clock,
        crate::routes::clock::delete_clock,
        crate::routes::clock::start_clock,
        crate::routes::clock::pause_clock,
        crate::routes::clock::next_quarter,
        crate::routes::clock::reset_clock,
        crate::routes::clock::sync_clock,
        crate::routes::clock::clock_stats,
        crate::routes::clock::list_events,
        crate::routes::clock::get_event,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::clock::CreateClockRequest,
            crate::dto::clock::SyncClockRequest,
            crate::dto::clock::ClockStatsResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::ClockUpdateEvent,
            crate::state::clock::ClockView,
            crate::state::clock::ClockStatus,
            crate::state::registry::MemoryStats,
            crate::dao::models::EventEntity,
            crate::dao::models::ClockEntity,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "clocks", description = "Clock commands and authoritative reads"),
        (name = "events", description = "Event records"),
    )
)]
pub struct ApiDoc;
