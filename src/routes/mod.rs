use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod fallback;
pub mod health;
pub mod participant;
pub mod session;
pub mod sse;

/// Compose every route tree and attach the shared state.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(session::router())
        .merge(participant::router())
        .merge(fallback::router())
        .merge(docs::router());

    api_router.with_state(state)
}
