use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/clocks",
    tag = "sse",
    responses((status = 200, description = "Clock update stream", content_type = "text/event-stream", body = String))
)]
/// Push every clock mutation to connected observers.
pub async fn clock_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe_clocks(&state);
    info!("New clock SSE connection");
    sse_service::to_sse_stream(receiver, sse_service::clock_handshake(&state))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/clocks", get(clock_stream))
}
