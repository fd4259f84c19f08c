use axum::{Json, Router, extract::State, routing::{get, post}};

use crate::{
    dto::fallback::{ClearPendingResponse, PendingWritesResponse, ReplayResponse},
    error::AppError,
    services::fallback_service,
    state::SharedState,
};

/// Operator endpoints over the pending durable-write queue.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/fallback/pending", get(pending_writes).delete(clear_pending))
        .route("/fallback/replay", post(replay))
}

/// Writes parked while the durable store was unreachable.
#[utoipa::path(
    get,
    path = "/fallback/pending",
    tag = "fallback",
    responses((status = 200, description = "Pending writes, oldest first", body = PendingWritesResponse))
)]
pub async fn pending_writes(
    State(state): State<SharedState>,
) -> Result<Json<PendingWritesResponse>, AppError> {
    Ok(Json(fallback_service::pending_writes(&state).await?))
}

/// Discard every parked write.
#[utoipa::path(
    delete,
    path = "/fallback/pending",
    tag = "fallback",
    responses((status = 200, description = "Queue cleared", body = ClearPendingResponse))
)]
pub async fn clear_pending(
    State(state): State<SharedState>,
) -> Result<Json<ClearPendingResponse>, AppError> {
    Ok(Json(fallback_service::clear_pending(&state).await?))
}

/// Replay parked writes against the durable store now.
#[utoipa::path(
    post,
    path = "/fallback/replay",
    tag = "fallback",
    responses(
        (status = 200, description = "Replay finished", body = ReplayResponse),
        (status = 503, description = "Durable store not connected")
    )
)]
pub async fn replay(State(state): State<SharedState>) -> Result<Json<ReplayResponse>, AppError> {
    Ok(Json(fallback_service::replay(&state).await?))
}
