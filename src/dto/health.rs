use serde::Serialize;
use utoipa::ToSchema;

/// Reachability of one backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoreHealth {
    Up,
    Down,
    /// No store installed yet.
    Missing,
}

/// Health report returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" when both stores answer and nothing is parked, "degraded" otherwise.
    pub status: String,
    /// Fast store check result.
    pub fast_store: StoreHealth,
    /// Durable store check result.
    pub durable_store: StoreHealth,
    /// Durable writes waiting in the fallback queue.
    pub pending_writes: u64,
}

impl HealthResponse {
    /// Derive the overall status from the store checks.
    pub fn from_checks(
        fast_store: StoreHealth,
        durable_store: StoreHealth,
        degraded: bool,
        pending_writes: u64,
    ) -> Self {
        let healthy = fast_store == StoreHealth::Up && durable_store == StoreHealth::Up && !degraded;
        Self {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            fast_store,
            durable_store,
            pending_writes,
        }
    }
}
