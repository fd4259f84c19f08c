use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::models::now_ms,
    dto::sse::SystemMetricsEvent,
    services::broadcast,
    state::{SharedState, channels::Channel},
};

/// Sample the engine counters for one session's controller.
pub async fn snapshot(state: &SharedState, session_id: Uuid) -> SystemMetricsEvent {
    let pending_fallback_writes = match state.guard().count().await {
        Ok(count) => count,
        Err(err) => {
            warn!(error = %err, "failed to count pending fallback writes");
            0
        }
    };
    let channels = state.channels();
    let session_subscribers = [
        Channel::Display(session_id),
        Channel::Controller(session_id),
        Channel::Participants(session_id),
    ]
    .into_iter()
    .chain(channels.participant_channels(session_id))
    .map(|channel| channels.subscriber_count(channel))
    .sum();

    SystemMetricsEvent {
        session_id,
        session_subscribers,
        total_subscribers: channels.total_subscribers(),
        pending_fallback_writes,
        active_timers: state.timers().active_count(),
        scoring_workers: state.scoring().worker_count(),
        degraded: state.guard().is_degraded(),
        sampled_at_ms: now_ms(),
    }
}

/// Publish [`snapshot`] to every session with a connected controller, each `interval`.
pub fn spawn_poller(state: SharedState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for session_id in state.channels().active_sessions() {
                if state.channels().subscriber_count(Channel::Controller(session_id)) == 0 {
                    continue;
                }
                let metrics = snapshot(&state, session_id).await;
                let reached = broadcast::system_metrics(state.channels(), &metrics);
                debug!(%session_id, reached, "system metrics published");
            }
        }
    })
}
