//! Session flow: creation, joining, question progression, answer ingestion
//! and moderation.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::LateSubmissionPolicy,
    dao::models::{ParticipantEntity, ParticipantStatus, SessionEntity, SubmissionRecord, now_ms},
    dto::{
        session::{
            CreateSessionRequest, JoinRequest, JoinResponse, LeaderboardEntry, ParticipantStanding,
            SubmitAnswerRequest, SubmitAnswerResponse,
        },
        sse::ParticipantPresence,
    },
    error::ServiceError,
    services::{
        audit::AuditEvent,
        broadcast::{self, BroadcastOutcome},
        ffi::FfiResolution,
        scoring::SubmissionNotice,
    },
    state::{
        SharedState,
        quiz::{Question, Quiz},
        session_store::ensure_joinable,
        state_machine::{SessionEvent, SessionPhase},
    },
};

const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const JOIN_CODE_LENGTH: usize = 6;
const JOIN_CODE_ATTEMPTS: usize = 8;

/// Random join code without look-alike characters (no 0/O, 1/I).
pub fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

async fn load_quiz(state: &SharedState, quiz_id: Uuid) -> Result<Arc<Quiz>, ServiceError> {
    state
        .catalog()
        .get_quiz(quiz_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("quiz {quiz_id}")))
}

/// Open a new session in the lobby for an existing quiz.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<SessionEntity, ServiceError> {
    let quiz = load_quiz(state, request.quiz_id).await?;
    if quiz.questions.is_empty() {
        return Err(ServiceError::InvalidInput("quiz has no questions".into()));
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let now = now_ms();
        let session = SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            join_code: generate_join_code(),
            state: SessionPhase::Lobby,
            current_question_index: None,
            current_question_id: None,
            participant_count: 0,
            allow_late_joiners: request.allow_late_joiners,
            exam_mode: request.exam_mode.clone(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        match state.sessions().create(session).await {
            Ok(created) => return Ok(created),
            Err(ServiceError::InvalidState(reason)) if attempt < JOIN_CODE_ATTEMPTS => {
                debug!(attempt, %reason, "join code collision; retrying");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Register a participant through a join code.
pub async fn join_session(state: &SharedState, request: JoinRequest) -> Result<JoinResponse, ServiceError> {
    let session = state
        .sessions()
        .find_by_join_code(&request.join_code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("join code {}", request.join_code)))?;
    ensure_joinable(&session)?;

    let nickname = request.nickname.trim().to_string();
    if state.participants().is_banned(session.id, &nickname).await? {
        state.audit().record(AuditEvent::RejoinRefused {
            session_id: session.id,
            nickname: nickname.clone(),
        });
        return Err(ServiceError::InvalidState(
            "nickname is banned from this session".into(),
        ));
    }
    if state.participants().nickname_taken(session.id, &nickname).await? {
        return Err(ServiceError::InvalidState(format!(
            "nickname `{nickname}` is already taken"
        )));
    }

    let participant = ParticipantEntity {
        id: Uuid::new_v4(),
        nickname,
        status: ParticipantStatus::Active,
        joined_at_ms: now_ms(),
    };
    state.participants().put(session.id, &participant).await?;
    let updated = state
        .sessions()
        .update(session.id, |session| {
            session.participant_count = session.participant_count.saturating_add(1);
            Ok(())
        })
        .await?;
    info!(session_id = %session.id, participant_id = %participant.id, "participant joined");

    if updated.state == SessionPhase::Lobby {
        if let Err(err) = broadcast::lobby_state(state, session.id).await {
            warn!(session_id = %session.id, error = %err, "failed to broadcast lobby state");
        }
    }
    broadcast::participant_status_changed(
        state.channels(),
        session.id,
        &participant,
        ParticipantPresence::Joined,
    );

    Ok(JoinResponse {
        session_id: session.id,
        participant_id: participant.id,
        nickname: participant.nickname,
        state: updated.state,
    })
}

/// Leave the lobby and open the first question.
pub async fn start_quiz(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    let quiz = load_quiz(state, session.quiz_id).await?;
    let first = quiz
        .question_at(0)
        .ok_or_else(|| ServiceError::InvalidInput("quiz has no questions".into()))?;

    let started = state
        .sessions()
        .transition(session_id, SessionEvent::Start, |session| {
            session.current_question_index = Some(0);
            session.current_question_id = Some(first.id);
            Ok(())
        })
        .await?;

    broadcast::quiz_started(state, session_id).await?;
    open_question(state, session_id, first).await?;
    Ok(started)
}

/// Start a round: evict stale scoring caches, announce the question, arm its timer.
async fn open_question(
    state: &SharedState,
    session_id: Uuid,
    question: Arc<Question>,
) -> Result<BroadcastOutcome, ServiceError> {
    state.scoring().on_round_started(session_id, question);
    broadcast::question_started(state, session_id).await
}

/// Reveal the active question now instead of waiting for its timer.
pub async fn reveal_question(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    let question_id = match (session.state, session.current_question_id) {
        (SessionPhase::ActiveQuestion, Some(question_id)) => question_id,
        (phase, _) => {
            return Err(ServiceError::InvalidState(format!(
                "no active question to reveal (session is {phase:?})"
            )));
        }
    };

    state.timers().cancel_for(session_id, question_id);
    match complete_question(state, session_id, question_id).await? {
        BroadcastOutcome::Published(_) => state.sessions().require(session_id).await,
        BroadcastOutcome::Suppressed(phase) => Err(ServiceError::InvalidState(format!(
            "question already closed (session is {phase:?})"
        ))),
    }
}

/// Timer expiry of a question.
pub async fn on_question_expired(state: &SharedState, session_id: Uuid, question_id: Uuid) {
    match complete_question(state, session_id, question_id).await {
        Ok(outcome) => debug!(%session_id, %question_id, ?outcome, "question timer handled"),
        Err(err) => warn!(%session_id, %question_id, error = %err, "failed to reveal expired question"),
    }
}

/// Reveal, then schedule the next question when the session auto-advances.
async fn complete_question(
    state: &SharedState,
    session_id: Uuid,
    question_id: Uuid,
) -> Result<BroadcastOutcome, ServiceError> {
    let outcome = broadcast::reveal_answers(state, session_id, question_id).await?;
    if outcome.is_published() {
        let session = state.sessions().require(session_id).await?;
        if session.exam_mode.auto_advance {
            let delay = if session.exam_mode.skip_reveal {
                Duration::ZERO
            } else {
                state.config().flow.reveal_delay
            };
            schedule_auto_advance(state, session_id, question_id, delay);
        }
    }
    Ok(outcome)
}

fn schedule_auto_advance(state: &SharedState, session_id: Uuid, question_id: Uuid, delay: Duration) {
    let weak = Arc::downgrade(state);
    // shares the question's timer slot, so next/end cancel it like any timer
    state.timers().create_timer(
        session_id,
        question_id,
        delay,
        Box::new(move || {
            Box::pin(async move {
                if let Some(state) = weak.upgrade() {
                    advance_after(&state, session_id, question_id).await;
                }
            })
        }),
    );
    debug!(%session_id, %question_id, ?delay, "auto-advance scheduled");
}

async fn advance_after(state: &SharedState, session_id: Uuid, question_id: Uuid) {
    let session = match state.sessions().require(session_id).await {
        Ok(session) => session,
        Err(err) => {
            warn!(%session_id, error = %err, "auto-advance could not load session");
            return;
        }
    };
    if session.state != SessionPhase::Reveal || session.current_question_id != Some(question_id) {
        debug!(%session_id, %question_id, "auto-advance skipped; session moved on");
        return;
    }
    if let Err(err) = next_question(state, session_id).await {
        warn!(%session_id, error = %err, "auto-advance failed");
    }
}

/// Open the question after the revealed one, or end the quiz after the last.
pub async fn next_question(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    if session.state != SessionPhase::Reveal {
        return Err(ServiceError::InvalidState(format!(
            "cannot advance while in {:?}; reveal the current question first",
            session.state
        )));
    }
    if let Some(current) = session.current_question_id {
        state.timers().cancel_for(session_id, current);
    }

    let quiz = load_quiz(state, session.quiz_id).await?;
    let next_index = session.current_question_index.map_or(0, |index| index + 1);
    let Some(next) = quiz.question_at(next_index) else {
        info!(%session_id, "last question done; ending quiz");
        return end_quiz(state, session_id).await;
    };

    let advanced = state
        .sessions()
        .transition(session_id, SessionEvent::NextQuestion, |session| {
            session.current_question_index = Some(next_index);
            session.current_question_id = Some(next.id);
            Ok(())
        })
        .await?;
    open_question(state, session_id, next).await?;
    Ok(advanced)
}

/// End the quiz: stop timers and scoring, flush answers, publish final standings.
pub async fn end_quiz(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    let cancelled = state.timers().cancel_session(session_id);
    let ended = state
        .sessions()
        .transition(session_id, SessionEvent::End, |_| Ok(()))
        .await?;
    state.scoring().stop_session(session_id);
    if let Err(err) = state.batcher().flush().await {
        warn!(%session_id, error = %err, "final answer flush failed; periodic flush will retry");
    }
    info!(%session_id, cancelled_timers = cancelled, "quiz ended");

    broadcast::quiz_ended(state, session_id).await?;
    if let Err(err) = broadcast::leaderboard_updated(state, session_id).await {
        warn!(%session_id, error = %err, "failed to broadcast final leaderboard");
    }
    state.sessions().forget(session_id);
    // buffered events still drain before the streams see the close
    state.channels().close_session(session_id);
    Ok(ended)
}

/// Accept an answer: buffer it, record arrival order and hand it to scoring.
pub async fn submit_answer(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
    request: SubmitAnswerRequest,
) -> Result<SubmitAnswerResponse, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    match session.state {
        SessionPhase::Ended => return Err(ServiceError::InvalidState("session has ended".into())),
        SessionPhase::Lobby => {
            return Err(ServiceError::InvalidState("quiz has not started yet".into()));
        }
        SessionPhase::ActiveQuestion | SessionPhase::Reveal => {}
    }

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

    let quiz = load_quiz(state, session.quiz_id).await?;
    let question = quiz
        .question(request.question_id)
        .ok_or_else(|| ServiceError::NotFound(format!("question {}", request.question_id)))?;
    if session.current_question_id != Some(question.id) {
        return Err(ServiceError::InvalidState("question is not open".into()));
    }
    if session.state == SessionPhase::Reveal
        && state.config().scoring.late_submissions == LateSubmissionPolicy::Reject
    {
        return Err(ServiceError::InvalidState("question is closed".into()));
    }
    if let Some(unknown) = request
        .selected_option_ids
        .iter()
        .find(|selected| !question.options.iter().any(|option| &option.id == *selected))
    {
        return Err(ServiceError::InvalidInput(format!("unknown option `{unknown}`")));
    }

    let notice = SubmissionNotice {
        session_id,
        participant_id,
        answer_id: request.answer_id.clone(),
    };
    if let Some(existing) = state.answers().get(session_id, &request.answer_id).await? {
        if existing.participant_id != participant_id {
            return Err(ServiceError::InvalidState("answer id already used".into()));
        }
        // retried submission: scoring dedupes on the answer id
        state.scoring().notify(notice);
        return Ok(SubmitAnswerResponse {
            answer_id: request.answer_id,
            accepted: true,
        });
    }
    let record = SubmissionRecord {
        answer_id: request.answer_id.clone(),
        participant_id,
        question_id: question.id,
        session_id,
        selected_option_ids: request.selected_option_ids,
        value: request.value,
        response_time_ms: request.response_time_ms,
        submitted_at_ms: now_ms(),
    };
    // the arrival slot is the one-answer-per-question claim
    let first = state
        .ffi()
        .track_submission(session_id, question.id, participant_id, record.submitted_at_ms)
        .await?;
    if !first {
        return Err(ServiceError::InvalidState(
            "question already answered".into(),
        ));
    }
    state.answers().put(&record, question.time_limit).await?;
    state.scoring().notify(notice);
    debug!(%session_id, %participant_id, question_id = %question.id, answer_id = %record.answer_id, "answer accepted");

    broadcast::answer_count_updated(state, session_id, question.id, session.participant_count).await;
    Ok(SubmitAnswerResponse {
        answer_id: record.answer_id,
        accepted: true,
    })
}

/// Kick, ban or reinstate a participant.
pub async fn set_participant_status(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
    status: ParticipantStatus,
) -> Result<ParticipantEntity, ServiceError> {
    let presence = match status {
        ParticipantStatus::Active => ParticipantPresence::Active,
        ParticipantStatus::Kicked => ParticipantPresence::Kicked,
        ParticipantStatus::Banned => ParticipantPresence::Banned,
        ParticipantStatus::Disconnected => {
            return Err(ServiceError::InvalidInput(
                "disconnected is set by the stream, not by moderation".into(),
            ));
        }
    };
    state.sessions().require(session_id).await?;

    let updated = state
        .participants()
        .set_status(session_id, participant_id, status)
        .await?;
    let nickname = updated.nickname.clone();
    state.audit().record(match status {
        ParticipantStatus::Kicked => AuditEvent::ParticipantKicked {
            session_id,
            participant_id,
            nickname,
        },
        ParticipantStatus::Banned => AuditEvent::ParticipantBanned {
            session_id,
            participant_id,
            nickname,
        },
        _ => AuditEvent::ParticipantReinstated {
            session_id,
            participant_id,
            nickname,
        },
    });

    broadcast::participant_status_changed(state.channels(), session_id, &updated, presence);
    if let Err(err) = broadcast::lobby_state(state, session_id).await {
        warn!(%session_id, error = %err, "failed to refresh lobby after moderation");
    }
    Ok(updated)
}

/// Current session record.
pub async fn session(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    state.sessions().require(session_id).await
}

/// Ranked standings, optionally limited to the best `limit` entries.
pub async fn leaderboard(
    state: &SharedState,
    session_id: Uuid,
    limit: Option<usize>,
) -> Result<Vec<LeaderboardEntry>, ServiceError> {
    state.sessions().require(session_id).await?;
    match limit {
        Some(limit) => state.leaderboard().top_n(session_id, limit).await,
        None => state.leaderboard().full(session_id).await,
    }
}

/// A participant's score and rank.
pub async fn participant_standing(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<ParticipantStanding, ServiceError> {
    state
        .participants()
        .get(session_id, participant_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("participant {participant_id}")))?;
    let score = state.scores().get(session_id, participant_id).await?;
    let rank = state.leaderboard().rank_of(session_id, participant_id).await?;
    Ok(ParticipantStanding::new(participant_id, score, rank))
}

/// FFI winners of a question.
pub async fn ffi_result(
    state: &SharedState,
    session_id: Uuid,
    question_id: Uuid,
) -> Result<FfiResolution, ServiceError> {
    let session = state.sessions().require(session_id).await?;
    let quiz = load_quiz(state, session.quiz_id).await?;
    if quiz.question(question_id).is_none() {
        return Err(ServiceError::NotFound(format!("question {question_id}")));
    }
    state.ffi().resolve_winners(session_id, question_id, &quiz).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_codes_use_the_unambiguous_alphabet() {
        for _ in 0..64 {
            let code = generate_join_code();
            assert_eq!(code.len(), JOIN_CODE_LENGTH);
            assert!(code.bytes().all(|byte| JOIN_CODE_ALPHABET.contains(&byte)));
            assert!(!code.contains('O') && !code.contains('0') && !code.contains('I'));
        }
    }
}
