use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    services::sse_service::{self, StreamKind},
    state::{SharedState, channels::Channel},
};

#[utoipa::path(
    get,
    path = "/sse/sessions/{id}/display",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Display SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream the big-screen view of a session.
pub async fn display_stream(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let receivers = sse_service::subscribe_session(&state, Channel::Display(session_id)).await?;
    info!(%session_id, "new display SSE connection");
    Ok(sse_service::to_sse_stream(receivers, StreamKind::Display))
}

#[utoipa::path(
    get,
    path = "/sse/sessions/{id}/controller",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Controller SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream host events, including the full leaderboard and system metrics.
pub async fn controller_stream(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let receivers = sse_service::subscribe_session(&state, Channel::Controller(session_id)).await?;
    info!(%session_id, "new controller SSE connection");
    Ok(sse_service::to_sse_stream(receivers, StreamKind::Controller))
}

#[utoipa::path(
    get,
    path = "/sse/sessions/{id}/participants",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "All-participants SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream events addressed to every participant, without personal results.
pub async fn participants_stream(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let receivers =
        sse_service::subscribe_session(&state, Channel::Participants(session_id)).await?;
    info!(%session_id, "new participants SSE connection");
    Ok(sse_service::to_sse_stream(receivers, StreamKind::Participants))
}

#[utoipa::path(
    get,
    path = "/sse/sessions/{id}/participants/{pid}",
    tag = "sse",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("pid" = Uuid, Path, description = "Participant identifier")
    ),
    responses(
        (status = 200, description = "Personal SSE stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown session or participant"),
        (status = 409, description = "Participant was kicked or banned")
    )
)]
/// Stream a participant's personal events merged with the shared ones.
pub async fn participant_stream(
    State(state): State<SharedState>,
    Path((session_id, participant_id)): Path<(Uuid, Uuid)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let receivers = sse_service::subscribe_participant(&state, session_id, participant_id).await?;
    info!(%session_id, %participant_id, "new participant SSE connection");
    Ok(sse_service::to_sse_stream(
        receivers,
        StreamKind::Participant {
            state,
            session_id,
            participant_id,
        },
    ))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/sessions/{id}/display", get(display_stream))
        .route("/sse/sessions/{id}/controller", get(controller_stream))
        .route("/sse/sessions/{id}/participants", get(participants_stream))
        .route(
            "/sse/sessions/{id}/participants/{pid}",
            get(participant_stream),
        )
}
