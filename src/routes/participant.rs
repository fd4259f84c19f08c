use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{
        JoinRequest, JoinResponse, ParticipantStanding, SubmitAnswerRequest, SubmitAnswerResponse,
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Endpoints used by participant devices.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/join", post(join_session))
        .route(
            "/sessions/{id}/participants/{pid}/answers",
            post(submit_answer),
        )
        .route(
            "/sessions/{id}/participants/{pid}/standing",
            get(participant_standing),
        )
}

/// Join a session with its code and a nickname.
#[utoipa::path(
    post,
    path = "/join",
    tag = "participants",
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Joined", body = JoinResponse),
        (status = 404, description = "Unknown join code"),
        (status = 409, description = "Session closed, nickname taken or banned")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinRequest>>,
) -> Result<Json<JoinResponse>, AppError> {
    Ok(Json(session_service::join_session(&state, payload).await?))
}

/// Submit an answer; the result arrives on the participant stream.
#[utoipa::path(
    post,
    path = "/sessions/{id}/participants/{pid}/answers",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("pid" = Uuid, Path, description = "Participant identifier")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer accepted for scoring", body = SubmitAnswerResponse),
        (status = 400, description = "Unknown option"),
        (status = 409, description = "Session not accepting answers or question already answered")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path((session_id, participant_id)): Path<(Uuid, Uuid)>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<SubmitAnswerResponse>, AppError> {
    let response =
        session_service::submit_answer(&state, session_id, participant_id, payload).await?;
    Ok(Json(response))
}

/// A participant's score and rank.
#[utoipa::path(
    get,
    path = "/sessions/{id}/participants/{pid}/standing",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("pid" = Uuid, Path, description = "Participant identifier")
    ),
    responses(
        (status = 200, description = "Current standing", body = ParticipantStanding),
        (status = 404, description = "Unknown participant")
    )
)]
pub async fn participant_standing(
    State(state): State<SharedState>,
    Path((session_id, participant_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ParticipantStanding>, AppError> {
    let standing =
        session_service::participant_standing(&state, session_id, participant_id).await?;
    Ok(Json(standing))
}
