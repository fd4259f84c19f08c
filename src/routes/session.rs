use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dao::models::ParticipantEntity,
    dto::session::{
        ActionResponse, CreateSessionRequest, FfiResultResponse, LeaderboardEntry,
        LeaderboardQuery, ParticipantStatusRequest, SessionSummary,
    },
    error::AppError,
    services::session_service,
    state::SharedState,
};

/// Controller endpoints driving a session through its lifecycle.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/start", post(start_quiz))
        .route("/sessions/{id}/reveal", post(reveal_question))
        .route("/sessions/{id}/next", post(next_question))
        .route("/sessions/{id}/end", post(end_quiz))
        .route("/sessions/{id}/leaderboard", get(leaderboard))
        .route("/sessions/{id}/questions/{qid}/ffi", get(ffi_result))
        .route(
            "/sessions/{id}/participants/{pid}/status",
            put(set_participant_status),
        )
}

/// Open a session in the lobby and hand out its join code.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionSummary),
        (status = 400, description = "Invalid exam mode or empty quiz"),
        (status = 404, description = "Unknown quiz")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionSummary>, AppError> {
    let session = session_service::create_session(&state, payload).await?;
    Ok(Json(session.into()))
}

/// Current state of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session found", body = SessionSummary),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSummary>, AppError> {
    let session = session_service::session(&state, session_id).await?;
    Ok(Json(session.into()))
}

/// Close the lobby and open the first question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Quiz started", body = ActionResponse),
        (status = 409, description = "Session is not in the lobby")
    )
)]
pub async fn start_quiz(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = session_service::start_quiz(&state, session_id).await?;
    Ok(Json(ActionResponse::new(session, state.guard().is_degraded())))
}

/// Reveal the active question before its timer runs out.
#[utoipa::path(
    post,
    path = "/sessions/{id}/reveal",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Answers revealed", body = ActionResponse),
        (status = 409, description = "No question is active")
    )
)]
pub async fn reveal_question(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = session_service::reveal_question(&state, session_id).await?;
    Ok(Json(ActionResponse::new(session, state.guard().is_degraded())))
}

/// Move past the revealed question; ends the quiz after the last one.
#[utoipa::path(
    post,
    path = "/sessions/{id}/next",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Next question opened or quiz ended", body = ActionResponse),
        (status = 409, description = "Current question is not revealed yet")
    )
)]
pub async fn next_question(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = session_service::next_question(&state, session_id).await?;
    Ok(Json(ActionResponse::new(session, state.guard().is_degraded())))
}

/// End the quiz immediately.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Quiz ended", body = ActionResponse),
        (status = 409, description = "Session already ended")
    )
)]
pub async fn end_quiz(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let session = session_service::end_quiz(&state, session_id).await?;
    Ok(Json(ActionResponse::new(session, state.guard().is_degraded())))
}

/// Ranked standings; `limit` restricts them to the top entries.
#[utoipa::path(
    get,
    path = "/sessions/{id}/leaderboard",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("limit" = Option<usize>, Query, description = "Number of top entries to return")
    ),
    responses((status = 200, description = "Leaderboard", body = [LeaderboardEntry]))
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Valid(Query(query)): Valid<Query<LeaderboardQuery>>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let entries = session_service::leaderboard(&state, session_id, query.limit).await?;
    Ok(Json(entries))
}

/// Fastest-finger-first winners of a question.
#[utoipa::path(
    get,
    path = "/sessions/{id}/questions/{qid}/ffi",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("qid" = Uuid, Path, description = "Question identifier")
    ),
    responses(
        (status = 200, description = "FFI resolution", body = FfiResultResponse),
        (status = 404, description = "Unknown session or question")
    )
)]
pub async fn ffi_result(
    State(state): State<SharedState>,
    Path((session_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<FfiResultResponse>, AppError> {
    let resolution = session_service::ffi_result(&state, session_id, question_id).await?;
    Ok(Json(resolution.into()))
}

/// Kick, ban or reinstate a participant.
#[utoipa::path(
    put,
    path = "/sessions/{id}/participants/{pid}/status",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("pid" = Uuid, Path, description = "Participant identifier")
    ),
    request_body = ParticipantStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ParticipantEntity),
        (status = 400, description = "Status cannot be set by moderation"),
        (status = 404, description = "Unknown session or participant")
    )
)]
pub async fn set_participant_status(
    State(state): State<SharedState>,
    Path((session_id, participant_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ParticipantStatusRequest>,
) -> Result<Json<ParticipantEntity>, AppError> {
    let participant =
        session_service::set_participant_status(&state, session_id, participant_id, payload.status)
            .await?;
    Ok(Json(participant))
}
