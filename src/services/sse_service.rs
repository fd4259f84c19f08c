use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt, stream::select_all};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream, errors::BroadcastStreamRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::ParticipantStatus,
    dto::sse::{Handshake, ParticipantPresence, ServerEvent},
    error::ServiceError,
    services::broadcast::{self as fanout, EVENT_CONNECTED},
    state::{SharedState, channels::Channel},
};

/// Identifies the audience of an SSE stream so teardown can do
/// audience-specific bookkeeping.
#[derive(Clone)]
pub enum StreamKind {
    Display,
    Controller,
    Participants,
    /// Carries the state so a dropped stream can mark the participant disconnected.
    Participant {
        state: SharedState,
        session_id: Uuid,
        participant_id: Uuid,
    },
}

/// Join one of the session-wide channels.
pub async fn subscribe_session(
    state: &SharedState,
    channel: Channel,
) -> Result<Vec<broadcast::Receiver<ServerEvent>>, ServiceError> {
    state.sessions().require(channel.session_id()).await?;
    let receiver = state.channels().subscribe(channel);
    send_handshake(state, channel);
    Ok(vec![receiver])
}

/// Join a participant's personal channel plus the all-participants channel,
/// marking the participant active again if it was disconnected.
pub async fn subscribe_participant(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<Vec<broadcast::Receiver<ServerEvent>>, ServiceError> {
    state.sessions().require(session_id).await?;
    let participant = state
        .participants()
        .get(session_id, participant_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("participant {participant_id}")))?;
    if !participant.status.can_submit() {
        return Err(ServiceError::InvalidState(
            "participant was removed from the session".into(),
        ));
    }

    let personal = Channel::Participant {
        session_id,
        participant_id,
    };
    let receivers = vec![
        state.channels().subscribe(personal),
        state.channels().subscribe(Channel::Participants(session_id)),
    ];

    if participant.status == ParticipantStatus::Disconnected {
        let restored = state
            .participants()
            .set_status(session_id, participant_id, ParticipantStatus::Active)
            .await?;
        fanout::participant_status_changed(
            state.channels(),
            session_id,
            &restored,
            ParticipantPresence::Active,
        );
    }
    send_handshake(state, personal);
    Ok(receivers)
}

fn send_handshake(state: &SharedState, channel: Channel) {
    fanout::publish(
        state.channels(),
        channel,
        EVENT_CONNECTED,
        &Handshake {
            stream: channel.to_string(),
            message: "stream connected".into(),
            degraded: state.guard().is_degraded(),
        },
    );
}

/// Convert channel receivers into one SSE response, forwarding events and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    receivers: Vec<broadcast::Receiver<ServerEvent>>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);
    let mut merged = select_all(receivers.into_iter().map(BroadcastStream::new));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = merged.next() => {
                    match next {
                        Some(Ok(payload)) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                            // keep the stream alive; the client resyncs on the next event
                            debug!(skipped, "SSE subscriber lagged");
                        }
                        None => break,
                    }
                }
            }
        }

        match kind {
            StreamKind::Display => info!("display SSE stream disconnected"),
            StreamKind::Controller => info!("controller SSE stream disconnected"),
            StreamKind::Participants => info!("participants SSE stream disconnected"),
            StreamKind::Participant {
                state,
                session_id,
                participant_id,
            } => {
                // own the state here so cleanup runs after the request context is gone
                mark_disconnected(&state, session_id, participant_id).await;
                info!(%session_id, %participant_id, "participant SSE stream disconnected");
            }
        }
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Flag an active participant as disconnected and tell the controller.
pub async fn mark_disconnected(state: &SharedState, session_id: Uuid, participant_id: Uuid) {
    let participant = match state.participants().get(session_id, participant_id).await {
        Ok(Some(participant)) => participant,
        Ok(None) => return,
        Err(err) => {
            warn!(%session_id, %participant_id, error = %err, "failed to load participant on disconnect");
            return;
        }
    };
    if participant.status != ParticipantStatus::Active {
        return;
    }

    match state
        .participants()
        .set_status(session_id, participant_id, ParticipantStatus::Disconnected)
        .await
    {
        Ok(updated) => fanout::participant_status_changed(
            state.channels(),
            session_id,
            &updated,
            ParticipantPresence::Disconnected,
        ),
        Err(err) => warn!(%session_id, %participant_id, error = %err, "failed to mark participant disconnected"),
    }
}
