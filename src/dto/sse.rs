use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{ParticipantEntity, ScoreBreakdown},
    dto::session::LeaderboardEntry,
    state::quiz::QuestionOption,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name; `None` sends an unnamed message.
    pub event: Option<String>,
    /// Serialized JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already-encoded data field.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Channel the stream is attached to.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the durable store is currently unavailable.
    pub degraded: bool,
}

/// Answer option as sent before the reveal. Carries no answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PublicOption {
    /// Option id used when answering.
    pub id: String,
    /// Display text.
    pub text: String,
}

impl From<&QuestionOption> for PublicOption {
    fn from(option: &QuestionOption) -> Self {
        Self {
            id: option.id.clone(),
            text: option.text.clone(),
        }
    }
}

/// Participant as listed in the lobby.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LobbyParticipant {
    /// Participant id.
    pub id: Uuid,
    /// Display name chosen at join.
    pub nickname: String,
}

impl From<&ParticipantEntity> for LobbyParticipant {
    fn from(participant: &ParticipantEntity) -> Self {
        Self {
            id: participant.id,
            nickname: participant.nickname.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Lobby snapshot while waiting for the host to start.
pub struct LobbyStateEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Code participants type to join.
    pub join_code: String,
    /// Participants that joined so far.
    pub participant_count: u32,
    /// Current roster.
    pub participants: Vec<LobbyParticipant>,
    /// Whether joining stays open after the quiz started.
    pub allow_late_joiners: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once when the host starts the quiz.
pub struct QuizStartedEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Quiz being played.
    pub quiz_id: Uuid,
    /// Quiz title.
    pub title: String,
    /// Number of questions in the quiz.
    pub total_questions: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// A question opened for answers, with the answer key stripped.
pub struct QuestionStartedEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Question concerned.
    pub question_id: Uuid,
    /// Zero-based position in the quiz.
    pub question_index: usize,
    /// Number of questions in the quiz.
    pub total_questions: usize,
    /// Display text.
    pub text: String,
    /// Options in canonical order, or a per-participant shuffle.
    pub options: Vec<PublicOption>,
    /// Whether the question expects a free-form value.
    pub free_form: bool,
    /// Answer window in seconds.
    pub time_limit_secs: u64,
    /// Opening time (unix milliseconds).
    pub started_at_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
/// Aggregates disclosed with the answer.
pub struct RevealStats {
    /// Answers received.
    pub answer_count: u64,
    /// Fully correct answers.
    pub correct_count: u64,
    /// Mean response time of scored answers.
    pub average_response_time_ms: f64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Answer disclosure; the only payload carrying correct option ids.
pub struct RevealAnswersEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Question concerned.
    pub question_id: Uuid,
    /// Zero-based position in the quiz.
    pub question_index: usize,
    /// Ids of the correct options.
    pub correct_option_ids: Vec<String>,
    /// Accepted values of a free-form question.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accepted_answers: Vec<String>,
    /// Round statistics.
    pub stats: RevealStats,
    /// Winners of a fastest-finger-first question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffi_winners: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Ranked standings; top entries for audiences, everything for the host.
pub struct LeaderboardUpdatedEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Ranked entries, best first.
    pub entries: Vec<LeaderboardEntry>,
    /// Participants on the board.
    pub total_participants: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Final standings.
pub struct QuizEndedEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Full ranking, best first.
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Outcome of one answer, sent to the answering participant only.
pub struct AnswerResultEvent {
    /// Client-chosen id of the submission.
    pub answer_id: String,
    /// Question concerned.
    pub question_id: Uuid,
    /// Whether the answer was fully correct.
    pub is_correct: bool,
    /// Points breakdown.
    pub score: ScoreBreakdown,
    /// Running score after the answer.
    pub total_score: i64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Running score of a participant after an answer.
pub struct ScoreUpdatedEvent {
    /// Participant concerned.
    pub participant_id: Uuid,
    /// Running score after the answer.
    pub total_score: i64,
    /// One-based rank, when ranked.
    pub rank: Option<u64>,
    /// Consecutive correct answers.
    pub streak: u32,
}

#[derive(Debug, Serialize, ToSchema)]
/// Progress of answers on the active question (controller only).
pub struct AnswerCountUpdatedEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Question concerned.
    pub question_id: Uuid,
    /// Answers received.
    pub answer_count: u64,
    /// Participants that joined so far.
    pub participant_count: u32,
}

/// Participant lifecycle change reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantPresence {
    Joined,
    Active,
    Disconnected,
    Kicked,
    Banned,
}

#[derive(Debug, Serialize, ToSchema)]
/// Participant joined, left or was moderated (controller only).
pub struct ParticipantStatusChangedEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Participant concerned.
    pub participant_id: Uuid,
    /// Display name chosen at join.
    pub nickname: String,
    /// New presence status.
    pub status: ParticipantPresence,
}

#[derive(Debug, Serialize, ToSchema)]
/// Periodic engine health snapshot (controller only).
pub struct SystemMetricsEvent {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Open streams of this session.
    pub session_subscribers: usize,
    /// Open streams across all sessions.
    pub total_subscribers: usize,
    /// Durable writes parked in the fallback queue.
    pub pending_fallback_writes: u64,
    /// Pending question timers.
    pub active_timers: usize,
    /// Live scoring workers.
    pub scoring_workers: usize,
    /// Whether the durable store is unavailable.
    pub degraded: bool,
    /// Sampling time (unix milliseconds).
    pub sampled_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_option_drops_answer_key() {
        let option = QuestionOption {
            id: "b".into(),
            text: "Paris".into(),
            is_correct: true,
        };
        let json = serde_json::to_value(PublicOption::from(&option)).unwrap();
        assert_eq!(json, serde_json::json!({"id": "b", "text": "Paris"}));
    }
}
