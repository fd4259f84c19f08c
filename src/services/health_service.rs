use tracing::warn;

use crate::{
    dto::health::{HealthResponse, StoreHealth},
    state::SharedState,
};

/// Check both stores and report whether the engine runs degraded.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let fast_store = match state.fast().health_check().await {
        Ok(()) => StoreHealth::Up,
        Err(err) => {
            warn!(error = %err, "fast store health check failed");
            StoreHealth::Down
        }
    };

    let durable_store = match state.guard().durable().await {
        Some(store) => match store.health_check().await {
            Ok(()) => StoreHealth::Up,
            Err(err) => {
                warn!(error = %err, "durable store health check failed");
                StoreHealth::Down
            }
        },
        None => {
            warn!("durable store unavailable (degraded mode)");
            StoreHealth::Missing
        }
    };

    // the queue lives in the fast store; an unreadable count is reported as empty
    let pending_writes = if fast_store == StoreHealth::Up {
        state.guard().count().await.unwrap_or_default()
    } else {
        0
    };

    HealthResponse::from_checks(
        fast_store,
        durable_store,
        state.guard().is_degraded(),
        pending_writes,
    )
}
