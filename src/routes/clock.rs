use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dao::models::EventEntity,
    dto::clock::{ClockStatsResponse, CreateClockRequest, SyncClockRequest},
    error::AppError,
    services::clock_service,
    state::{SharedState, clock::ClockView},
};

/// Clock command and read endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/clocks", post(create_clock))
        .route("/clocks/stats", get(clock_stats))
        .route("/clocks/{id}", get(get_clock).delete(delete_clock))
        .route("/clocks/{id}/start", post(start_clock))
        .route("/clocks/{id}/pause", post(pause_clock))
        .route("/clocks/{id}/next-quarter", post(next_quarter))
        .route("/clocks/{id}/reset", post(reset_clock))
        .route("/clocks/{id}/sync", post(sync_clock))
        .route("/events", get(list_events))
        .route("/events/{id}", get(get_event))
}

/// Create the clock of an event.
#[utoipa::path(
    post,
    path = "/clocks",
    tag = "clocks",
    request_body = CreateClockRequest,
    responses(
        (status = 200, description = "Clock created (or already existing)", body = ClockView),
        (status = 400, description = "Invalid settings")
    )
)]
pub async fn create_clock(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateClockRequest>>,
) -> Result<Json<ClockView>, AppError> {
    Ok(Json(clock_service::create(&state, payload).await?))
}

/// Authoritative clock state; polled by controllers and observers.
#[utoipa::path(
    get,
    path = "/clocks/{id}",
    tag = "clocks",
    params(("id" = String, Path, description = "Identifier of the event")),
    responses(
        (status = 200, description = "Current clock state", body = ClockView),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn get_clock(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClockView>, AppError> {
    Ok(Json(clock_service::get_state(&state, id).await?))
}

/// Delete an event together with its clock.
#[utoipa::path(
    delete,
    path = "/clocks/{id}",
    tag = "clocks",
    params(("id" = String, Path, description = "Identifier of the event")),
    responses(
        (status = 204, description = "Event deleted"),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn delete_clock(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    clock_service::delete(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start or resume the countdown.
#[utoipa::path(
    post,
    path = "/clocks/{id}/start",
    tag = "clocks",
    params(("id" = String, Path, description = "Identifier of the event")),
    responses(
        (status = 200, description = "Clock state after the command", body = ClockView),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn start_clock(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClockView>, AppError> {
    Ok(Json(clock_service::start(&state, id).await?))
}

/// Pause the countdown.
#[utoipa::path(
    post,
    path = "/clocks/{id}/pause",
    tag = "clocks",
    params(("id" = String, Path, description = "Identifier of the event")),
    responses(
        (status = 200, description = "Clock state after the command", body = ClockView),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn pause_clock(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClockView>, AppError> {
    Ok(Json(clock_service::pause(&state, id).await?))
}

/// Advance to the next quarter.
#[utoipa::path(
    post,
    path = "/clocks/{id}/next-quarter",
    tag = "clocks",
    params(("id" = String, Path, description = "Identifier of the event")),
    responses(
        (status = 200, description = "Clock state after the command", body = ClockView),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn next_quarter(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClockView>, AppError> {
    Ok(Json(clock_service::next_quarter(&state, id).await?))
}

/// Rewind the current quarter.
#[utoipa::path(
    post,
    path = "/clocks/{id}/reset",
    tag = "clocks",
    params(("id" = String, Path, description = "Identifier of the event")),
    responses(
        (status = 200, description = "Clock state after the command", body = ClockView),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn reset_clock(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClockView>, AppError> {
    Ok(Json(clock_service::reset(&state, id).await?))
}

/// Merge a partial snapshot into the clock.
#[utoipa::path(
    post,
    path = "/clocks/{id}/sync",
    tag = "clocks",
    params(("id" = String, Path, description = "Identifier of the event")),
    request_body = SyncClockRequest,
    responses(
        (status = 200, description = "Clock state after the merge", body = ClockView),
        (status = 400, description = "Invalid snapshot"),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn sync_clock(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SyncClockRequest>>,
) -> Result<Json<ClockView>, AppError> {
    Ok(Json(clock_service::sync(&state, id, payload).await?))
}

/// Registry occupancy and persistence backlog.
#[utoipa::path(
    get,
    path = "/clocks/stats",
    tag = "clocks",
    responses((status = 200, description = "Registry statistics", body = ClockStatsResponse))
)]
pub async fn clock_stats(State(state): State<SharedState>) -> Json<ClockStatsResponse> {
    Json(clock_service::stats(&state))
}

/// List every known event record.
#[utoipa::path(
    get,
    path = "/events",
    tag = "events",
    responses((status = 200, description = "Event records", body = [EventEntity]))
)]
pub async fn list_events(State(state): State<SharedState>) -> Json<Vec<EventEntity>> {
    Json(clock_service::list_events(&state).await)
}

/// Fetch one event record.
#[utoipa::path(
    get,
    path = "/events/{id}",
    tag = "events",
    params(("id" = String, Path, description = "Identifier of the event")),
    responses(
        (status = 200, description = "Event record", body = EventEntity),
        (status = 404, description = "Unknown event")
    )
)]
pub async fn get_event(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EventEntity>, AppError> {
    Ok(Json(clock_service::get_event(&state, id).await?))
}
