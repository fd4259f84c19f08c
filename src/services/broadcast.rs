//! Per-audience event fan-out.
//!
//! Lobby, quiz-start, question-start, reveal and quiz-end broadcasts check the
//! session phase first and report a suppressed no-op when it does not match.
//! Everything else is best-effort: failures are logged, never returned.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    dao::{
        keys,
        models::{ParticipantEntity, QuestionResult, now_ms},
    },
    dto::sse::{
        AnswerCountUpdatedEvent, LeaderboardUpdatedEvent, LobbyParticipant, LobbyStateEvent,
        ParticipantPresence, ParticipantStatusChangedEvent, PublicOption, QuestionStartedEvent,
        QuizEndedEvent, QuizStartedEvent, RevealAnswersEvent, RevealStats, ServerEvent,
        SystemMetricsEvent,
    },
    error::ServiceError,
    services::{ffi::FfiResolution, session_service},
    state::{
        SharedState,
        channels::{Channel, ChannelRegistry},
        quiz::{Question, Quiz},
        state_machine::{SessionEvent, SessionPhase},
    },
};

/// Handshake sent when a stream subscribes.
pub const EVENT_CONNECTED: &str = "connected";
/// Lobby roster and join code.
pub const EVENT_LOBBY_STATE: &str = "lobby_state";
/// Quiz left the lobby.
pub const EVENT_QUIZ_STARTED: &str = "quiz_started";
/// A question opened; carries no answer key.
pub const EVENT_QUESTION_STARTED: &str = "question_started";
/// Correct options and round statistics.
pub const EVENT_REVEAL_ANSWERS: &str = "reveal_answers";
/// Ranked standings.
pub const EVENT_LEADERBOARD_UPDATED: &str = "leaderboard_updated";
/// Final standings.
pub const EVENT_QUIZ_ENDED: &str = "quiz_ended";
/// Per-participant outcome of one answer.
pub const EVENT_ANSWER_RESULT: &str = "answer_result";
/// Per-participant running score, rank and streak.
pub const EVENT_SCORE_UPDATED: &str = "score_updated";
/// Controller-only submission counter.
pub const EVENT_ANSWER_COUNT_UPDATED: &str = "answer_count_updated";
/// Controller-only presence change.
pub const EVENT_PARTICIPANT_STATUS_CHANGED: &str = "participant_status_changed";
/// Controller-only engine metrics.
pub const EVENT_SYSTEM_METRICS: &str = "system_metrics";

/// Entries sent to the display and participants; the controller gets all.
pub const AUDIENCE_LEADERBOARD_SIZE: usize = 10;

/// Result of a phase-guarded broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Sent; carries the number of receivers reached.
    Published(usize),
    /// Not sent because the session is in another phase.
    Suppressed(SessionPhase),
}

impl BroadcastOutcome {
    /// Whether the broadcast went out.
    pub fn is_published(&self) -> bool {
        matches!(self, BroadcastOutcome::Published(_))
    }
}

/// Serialise `payload` and publish it on one channel. Returns the number of
/// receivers reached; serialisation failures are logged and reach nobody.
pub fn publish(channels: &ChannelRegistry, channel: Channel, event: &str, payload: &impl Serialize) -> usize {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(server_event) => {
            let receivers = channels.publish(channel, server_event);
            trace!(%channel, event, receivers, "event published");
            receivers
        }
        Err(err) => {
            warn!(%channel, event, error = %err, "failed to serialize SSE payload");
            0
        }
    }
}

/// Publish to the display, controller and all-participants channels.
fn publish_session_wide(
    channels: &ChannelRegistry,
    session_id: Uuid,
    event: &str,
    payload: &impl Serialize,
) -> usize {
    [
        Channel::Display(session_id),
        Channel::Controller(session_id),
        Channel::Participants(session_id),
    ]
    .into_iter()
    .map(|channel| publish(channels, channel, event, payload))
    .sum()
}

async fn load_quiz(state: &SharedState, quiz_id: Uuid) -> Result<Arc<Quiz>, ServiceError> {
    state
        .catalog()
        .get_quiz(quiz_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("quiz {quiz_id}")))
}

fn suppressed(session_id: Uuid, event: &str, phase: SessionPhase) -> BroadcastOutcome {
    debug!(%session_id, event, ?phase, "broadcast suppressed for session phase");
    BroadcastOutcome::Suppressed(phase)
}

/// Lobby snapshot; only while the session is in the lobby.
pub async fn lobby_state(state: &SharedState, session_id: Uuid) -> Result<BroadcastOutcome, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    if session.state != SessionPhase::Lobby {
        return Ok(suppressed(session_id, EVENT_LOBBY_STATE, session.state));
    }

    let participants: Vec<LobbyParticipant> = state
        .participants()
        .list(session_id)
        .await?
        .iter()
        .filter(|participant| participant.status.can_submit())
        .map(LobbyParticipant::from)
        .collect();
    let payload = LobbyStateEvent {
        session_id,
        join_code: session.join_code,
        participant_count: u32::try_from(participants.len()).unwrap_or(u32::MAX),
        participants,
        allow_late_joiners: session.allow_late_joiners,
    };
    Ok(BroadcastOutcome::Published(publish_session_wide(
        state.channels(),
        session_id,
        EVENT_LOBBY_STATE,
        &payload,
    )))
}

/// Quiz start notice; only once the session has an active question.
pub async fn quiz_started(state: &SharedState, session_id: Uuid) -> Result<BroadcastOutcome, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    if session.state != SessionPhase::ActiveQuestion {
        return Ok(suppressed(session_id, EVENT_QUIZ_STARTED, session.state));
    }

    let quiz = load_quiz(state, session.quiz_id).await?;
    let payload = QuizStartedEvent {
        session_id,
        quiz_id: quiz.id,
        title: quiz.title.clone(),
        total_questions: quiz.questions.len(),
    };
    Ok(BroadcastOutcome::Published(publish_session_wide(
        state.channels(),
        session_id,
        EVENT_QUIZ_STARTED,
        &payload,
    )))
}

/// Build the redacted `question_started` payload in canonical option order.
pub fn question_payload(
    session_id: Uuid,
    quiz: &Quiz,
    index: usize,
    question: &Question,
    started_at_ms: i64,
) -> QuestionStartedEvent {
    QuestionStartedEvent {
        session_id,
        question_id: question.id,
        question_index: index,
        total_questions: quiz.questions.len(),
        text: question.text.clone(),
        options: question.options.iter().map(PublicOption::from).collect(),
        free_form: question.is_free_form(),
        time_limit_secs: question.time_limit.as_secs(),
        started_at_ms,
    }
}

/// Announce the session's current question and arm its countdown.
///
/// Options never carry the answer key. With shuffling enabled each
/// participant channel gets its own order; display and controller keep the
/// canonical one.
pub async fn question_started(state: &SharedState, session_id: Uuid) -> Result<BroadcastOutcome, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    let (Some(index), Some(question_id)) = (session.current_question_index, session.current_question_id) else {
        return Ok(suppressed(session_id, EVENT_QUESTION_STARTED, session.state));
    };
    if session.state != SessionPhase::ActiveQuestion {
        return Ok(suppressed(session_id, EVENT_QUESTION_STARTED, session.state));
    }

    let quiz = load_quiz(state, session.quiz_id).await?;
    let question = quiz
        .question(question_id)
        .ok_or_else(|| ServiceError::NotFound(format!("question {question_id}")))?;
    let payload = question_payload(session_id, &quiz, index, &question, now_ms());

    let channels = state.channels();
    let mut receivers = publish(channels, Channel::Display(session_id), EVENT_QUESTION_STARTED, &payload)
        + publish(channels, Channel::Controller(session_id), EVENT_QUESTION_STARTED, &payload);
    if question.shuffle_options {
        for channel in channels.participant_channels(session_id) {
            let mut personal = payload.clone();
            personal.options.shuffle(&mut rand::rng());
            receivers += publish(channels, channel, EVENT_QUESTION_STARTED, &personal);
        }
    } else {
        receivers += publish(channels, Channel::Participants(session_id), EVENT_QUESTION_STARTED, &payload);
    }

    let weak = Arc::downgrade(state);
    state.timers().create_timer(
        session_id,
        question_id,
        question.time_limit,
        Box::new(move || {
            Box::pin(async move {
                if let Some(state) = weak.upgrade() {
                    session_service::on_question_expired(&state, session_id, question_id).await;
                }
            })
        }),
    );
    Ok(BroadcastOutcome::Published(receivers))
}

/// Aggregate answer statistics of a question.
pub fn summarize_results(answer_count: u64, results: &[QuestionResult]) -> RevealStats {
    let correct_count = results.iter().filter(|result| result.is_correct).count() as u64;
    let average_response_time_ms = if results.is_empty() {
        0.0
    } else {
        results
            .iter()
            .map(|result| result.response_time_ms as f64)
            .sum::<f64>()
            / results.len() as f64
    };
    RevealStats {
        answer_count: answer_count.max(results.len() as u64),
        correct_count,
        average_response_time_ms,
    }
}

async fn reveal_stats(state: &SharedState, session_id: Uuid, question_id: Uuid) -> Result<RevealStats, ServiceError> {
    let results: Vec<QuestionResult> = state
        .fast()
        .hash_get_all(&keys::question_results(session_id, question_id))
        .await?
        .into_iter()
        .filter_map(|(_, raw)| serde_json::from_str(&raw).ok())
        .collect();
    let answer_count = state.ffi().submission_count(session_id, question_id).await?;
    Ok(summarize_results(answer_count, &results))
}

/// Move the session to REVEAL and disclose the answer of `question_id`.
///
/// This is the only broadcast that carries correct option ids. Suppressed
/// when the question is no longer the session's active one.
pub async fn reveal_answers(
    state: &SharedState,
    session_id: Uuid,
    question_id: Uuid,
) -> Result<BroadcastOutcome, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    if session.state != SessionPhase::ActiveQuestion || session.current_question_id != Some(question_id) {
        return Ok(suppressed(session_id, EVENT_REVEAL_ANSWERS, session.state));
    }

    let transitioned = state
        .sessions()
        .transition(session_id, SessionEvent::Reveal, |session| {
            if session.current_question_id == Some(question_id) {
                Ok(())
            } else {
                Err(ServiceError::InvalidState("question is no longer active".into()))
            }
        })
        .await;
    let revealed = match transitioned {
        Ok(revealed) => revealed,
        Err(ServiceError::InvalidState(reason)) => {
            // lost a race with another reveal or an end
            debug!(%session_id, %question_id, %reason, "reveal skipped");
            let current = state.sessions().require(session_id).await?;
            return Ok(suppressed(session_id, EVENT_REVEAL_ANSWERS, current.state));
        }
        Err(err) => return Err(err),
    };

    let quiz = load_quiz(state, revealed.quiz_id).await?;
    let question = quiz
        .question(question_id)
        .ok_or_else(|| ServiceError::NotFound(format!("question {question_id}")))?;
    let stats = reveal_stats(state, session_id, question_id).await?;
    let ffi_winners = match state.ffi().resolve_winners(session_id, question_id, &quiz).await {
        Ok(FfiResolution::Resolved(ranking)) => Some(ranking.winners),
        Ok(FfiResolution::NotApplicable(_)) => None,
        Err(err) => {
            warn!(%session_id, %question_id, error = %err, "failed to resolve FFI winners for reveal");
            None
        }
    };

    let mut correct_option_ids: Vec<String> = question
        .options
        .iter()
        .filter(|option| option.is_correct)
        .map(|option| option.id.clone())
        .collect();
    correct_option_ids.sort();
    let payload = RevealAnswersEvent {
        session_id,
        question_id,
        question_index: revealed.current_question_index.unwrap_or_default(),
        correct_option_ids,
        accepted_answers: question.accepted_answers.clone(),
        stats,
        ffi_winners,
    };
    let receivers = publish_session_wide(state.channels(), session_id, EVENT_REVEAL_ANSWERS, &payload);

    if let Err(err) = leaderboard_updated(state, session_id).await {
        warn!(%session_id, error = %err, "failed to broadcast leaderboard after reveal");
    }
    Ok(BroadcastOutcome::Published(receivers))
}

/// Standings: the best entries to display and participants, all to the controller.
pub async fn leaderboard_updated(state: &SharedState, session_id: Uuid) -> Result<usize, ServiceError> {
    let full = state.leaderboard().full(session_id).await?;
    let total_participants = full.len() as u64;
    let top = LeaderboardUpdatedEvent {
        session_id,
        entries: full.iter().take(AUDIENCE_LEADERBOARD_SIZE).cloned().collect(),
        total_participants,
    };
    let channels = state.channels();
    let mut receivers = publish(channels, Channel::Display(session_id), EVENT_LEADERBOARD_UPDATED, &top)
        + publish(channels, Channel::Participants(session_id), EVENT_LEADERBOARD_UPDATED, &top);
    receivers += publish(
        channels,
        Channel::Controller(session_id),
        EVENT_LEADERBOARD_UPDATED,
        &LeaderboardUpdatedEvent {
            session_id,
            entries: full,
            total_participants,
        },
    );
    Ok(receivers)
}

/// Final standings; only once the session has ended.
pub async fn quiz_ended(state: &SharedState, session_id: Uuid) -> Result<BroadcastOutcome, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    if session.state != SessionPhase::Ended {
        return Ok(suppressed(session_id, EVENT_QUIZ_ENDED, session.state));
    }

    let payload = QuizEndedEvent {
        session_id,
        leaderboard: state.leaderboard().full(session_id).await?,
    };
    Ok(BroadcastOutcome::Published(publish_session_wide(
        state.channels(),
        session_id,
        EVENT_QUIZ_ENDED,
        &payload,
    )))
}

/// Tell the controller how many answers arrived for a question.
pub async fn answer_count_updated(state: &SharedState, session_id: Uuid, question_id: Uuid, participant_count: u32) {
    match state.ffi().submission_count(session_id, question_id).await {
        Ok(answer_count) => {
            publish(
                state.channels(),
                Channel::Controller(session_id),
                EVENT_ANSWER_COUNT_UPDATED,
                &AnswerCountUpdatedEvent {
                    session_id,
                    question_id,
                    answer_count,
                    participant_count,
                },
            );
        }
        Err(err) => warn!(%session_id, %question_id, error = %err, "failed to count answers"),
    }
}

/// Report a participant lifecycle change to the controller.
pub fn participant_status_changed(
    channels: &ChannelRegistry,
    session_id: Uuid,
    participant: &ParticipantEntity,
    status: ParticipantPresence,
) {
    publish(
        channels,
        Channel::Controller(session_id),
        EVENT_PARTICIPANT_STATUS_CHANGED,
        &ParticipantStatusChangedEvent {
            session_id,
            participant_id: participant.id,
            nickname: participant.nickname.clone(),
            status,
        },
    );
}

/// Send an engine health snapshot to the controller.
pub fn system_metrics(channels: &ChannelRegistry, metrics: &SystemMetricsEvent) -> usize {
    publish(
        channels,
        Channel::Controller(metrics.session_id),
        EVENT_SYSTEM_METRICS,
        metrics,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(is_correct: bool, response_time_ms: u64) -> QuestionResult {
        QuestionResult {
            is_correct,
            points: if is_correct { 100 } else { 0 },
            response_time_ms,
        }
    }

    #[test]
    fn stats_average_scored_results() {
        let stats = summarize_results(4, &[result(true, 1_000), result(false, 3_000), result(true, 2_000)]);
        assert_eq!(stats.answer_count, 4);
        assert_eq!(stats.correct_count, 2);
        assert!((stats.average_response_time_ms - 2_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stats_of_an_unanswered_question_are_zero() {
        let stats = summarize_results(0, &[]);
        assert_eq!(stats.answer_count, 0);
        assert_eq!(stats.correct_count, 0);
        assert_eq!(stats.average_response_time_ms, 0.0);
    }

    #[test]
    fn publish_reaches_only_the_addressed_channel() {
        let channels = ChannelRegistry::new(8);
        let session_id = Uuid::new_v4();
        let mut display = channels.subscribe(Channel::Display(session_id));
        let mut controller = channels.subscribe(Channel::Controller(session_id));

        let reached = publish(&channels, Channel::Controller(session_id), EVENT_SYSTEM_METRICS, &"ping");
        assert_eq!(reached, 1);
        assert!(controller.try_recv().is_ok());
        assert!(display.try_recv().is_err());
    }
}
