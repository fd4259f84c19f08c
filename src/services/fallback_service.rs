use tracing::info;

use crate::{
    dto::fallback::{ClearPendingResponse, PendingWriteView, PendingWritesResponse, ReplayResponse},
    error::ServiceError,
    state::SharedState,
};

/// Writes parked while the durable store was unreachable, oldest first.
pub async fn pending_writes(state: &SharedState) -> Result<PendingWritesResponse, ServiceError> {
    let writes: Vec<PendingWriteView> = state
        .guard()
        .get_pending_writes()
        .await?
        .iter()
        .map(PendingWriteView::from)
        .collect();
    Ok(PendingWritesResponse {
        count: writes.len(),
        degraded: state.guard().is_degraded(),
        writes,
    })
}

/// Discard every parked write.
pub async fn clear_pending(state: &SharedState) -> Result<ClearPendingResponse, ServiceError> {
    let cleared = state.guard().clear().await?;
    info!(cleared, "pending durable writes discarded by operator");
    Ok(ClearPendingResponse { cleared })
}

/// Replay parked writes now instead of waiting for the supervisor.
pub async fn replay(state: &SharedState) -> Result<ReplayResponse, ServiceError> {
    if state.guard().durable().await.is_none() {
        return Err(ServiceError::Degraded);
    }
    let report = state.guard().replay_pending().await?;
    info!(
        replayed = report.replayed,
        dropped = report.dropped,
        remaining = report.remaining,
        "manual fallback replay finished"
    );
    Ok(report.into())
}
