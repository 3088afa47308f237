use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::EventEntity,
    dto::clock::{ClockStatsResponse, CreateClockRequest, SyncClockRequest},
    error::ServiceError,
    state::{
        SharedState,
        clock::{ClockConfig, ClockEventSource, ClockView, CommandOutcome, EventId, GameClock},
    },
};

/// Create the clock of an event, together with a default event record when none exists.
///
/// Creating an event that already has a clock returns its current state unchanged.
pub async fn create(
    state: &SharedState,
    request: CreateClockRequest,
) -> Result<ClockView, ServiceError> {
    let event_id = request.event_id.unwrap_or_else(Uuid::new_v4);
    let config = ClockConfig::new(request.quarter_length_seconds, request.total_quarters);
    let persistence = state.persistence();

    if persistence.get_event(event_id).await.is_none() {
        let mut event = EventEntity::with_defaults(
            event_id,
            config.quarter_length_seconds,
            config.total_quarters,
            state.time().now(),
        );
        if let Some(name) = request.display_name_a {
            event.display_name_a = name;
        }
        if let Some(name) = request.display_name_b {
            event.display_name_b = name;
        }
        persistence.save_event(event).await;
        info!(%event_id, "event created");
    }

    let handle = state.registry().get_or_create(event_id, config).await;
    Ok(handle.read())
}

/// Start or resume the countdown.
pub async fn start(state: &SharedState, event_id: EventId) -> Result<ClockView, ServiceError> {
    run_command(state, event_id, GameClock::start).await
}

/// Pause the countdown.
pub async fn pause(state: &SharedState, event_id: EventId) -> Result<ClockView, ServiceError> {
    run_command(state, event_id, GameClock::pause).await
}

/// Advance to the next quarter, finishing the event after the last one.
pub async fn next_quarter(
    state: &SharedState,
    event_id: EventId,
) -> Result<ClockView, ServiceError> {
    run_command(state, event_id, GameClock::next_quarter).await
}

/// Rewind the current quarter.
pub async fn reset(state: &SharedState, event_id: EventId) -> Result<ClockView, ServiceError> {
    run_command(state, event_id, GameClock::reset).await
}

/// Merge a controller snapshot into the clock.
pub async fn sync(
    state: &SharedState,
    event_id: EventId,
    request: SyncClockRequest,
) -> Result<ClockView, ServiceError> {
    let patch = request.into_patch()?;
    run_command(state, event_id, move |clock| {
        clock.sync(patch, ClockEventSource::Controller)
    })
    .await
}

/// Authoritative read path.
pub async fn get_state(state: &SharedState, event_id: EventId) -> Result<ClockView, ServiceError> {
    state
        .registry()
        .read(event_id)
        .await
        .ok_or(ServiceError::NotFound(event_id))
}

/// Delete the event, its clock record and its live instance.
pub async fn delete(state: &SharedState, event_id: EventId) -> Result<(), ServiceError> {
    if state.registry().delete(event_id).await {
        Ok(())
    } else {
        Err(ServiceError::NotFound(event_id))
    }
}

/// Fetch the event record of an event.
pub async fn get_event(state: &SharedState, event_id: EventId) -> Result<EventEntity, ServiceError> {
    state
        .persistence()
        .get_event(event_id)
        .await
        .ok_or(ServiceError::NotFound(event_id))
}

/// List every known event record.
pub async fn list_events(state: &SharedState) -> Vec<EventEntity> {
    state.persistence().list_events().await
}

/// Registry occupancy and persistence backlog.
pub fn stats(state: &SharedState) -> ClockStatsResponse {
    let sync = &state.config().sync;
    ClockStatsResponse {
        memory: state.registry().memory_stats(),
        pending_writes: state.persistence().pending_writes(),
        degraded: state.is_degraded(),
        controller_poll_interval_seconds: sync.controller_poll_interval.as_secs_f64(),
        observer_poll_interval_seconds: sync.observer_poll_interval.as_secs_f64(),
    }
}

async fn run_command<F>(
    state: &SharedState,
    event_id: EventId,
    command: F,
) -> Result<ClockView, ServiceError>
where
    F: FnOnce(&mut GameClock) -> CommandOutcome,
{
    let handle = state
        .registry()
        .get_or_restore(event_id)
        .await
        .ok_or(ServiceError::NotFound(event_id))?;

    Ok(handle.with(|clock| {
        clock.enforce_expiry();
        let _ = command(clock);
        clock.view()
    }))
}
