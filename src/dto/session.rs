//! DTO definitions used by the controller and participant REST API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{ExamMode, ParticipantScore, ParticipantStatus, SessionEntity},
    dto::validation::{validate_exam_mode, validate_nickname},
    services::ffi::{FfiRanking, FfiResolution},
    state::state_machine::SessionPhase,
};

/// Payload to open a new live session for a quiz.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateSessionRequest {
    /// Quiz being played.
    pub quiz_id: Uuid,
    /// Whether joining stays open after the quiz started.
    #[serde(default)]
    pub allow_late_joiners: bool,
    /// Scoring and flow options.
    #[serde(default)]
    #[validate(custom(function = "validate_exam_mode"))]
    pub exam_mode: ExamMode,
}

/// Public projection of a session.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    /// Session id.
    pub id: Uuid,
    /// Quiz being played.
    pub quiz_id: Uuid,
    /// Code participants type to join.
    pub join_code: String,
    /// Current lifecycle phase.
    pub state: SessionPhase,
    /// Zero-based index of the current question.
    pub current_question_index: Option<usize>,
    /// Participants that joined so far.
    pub participant_count: u32,
    /// Whether joining stays open after the quiz started.
    pub allow_late_joiners: bool,
    /// Scoring and flow options.
    pub exam_mode: ExamMode,
}

impl From<SessionEntity> for SessionSummary {
    fn from(session: SessionEntity) -> Self {
        Self {
            id: session.id,
            quiz_id: session.quiz_id,
            join_code: session.join_code,
            state: session.state,
            current_question_index: session.current_question_index,
            participant_count: session.participant_count,
            allow_late_joiners: session.allow_late_joiners,
            exam_mode: session.exam_mode,
        }
    }
}

/// Payload a participant sends to join with a code.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct JoinRequest {
    /// Code participants type to join.
    #[validate(length(equal = 6, message = "join code must have 6 characters"))]
    pub join_code: String,
    /// Display name chosen at join.
    #[validate(custom(function = "validate_nickname"))]
    pub nickname: String,
}

/// Identifiers handed back after a successful join.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinResponse {
    /// Session the event belongs to.
    pub session_id: Uuid,
    /// Participant concerned.
    pub participant_id: Uuid,
    /// Display name chosen at join.
    pub nickname: String,
    /// Current lifecycle phase.
    pub state: SessionPhase,
}

/// Answer submission.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SubmitAnswerRequest {
    /// Client-generated idempotency key.
    #[validate(length(min = 1, max = 128))]
    pub answer_id: String,
    /// Question concerned.
    pub question_id: Uuid,
    /// Chosen option ids.
    #[serde(default)]
    #[validate(length(max = 32))]
    pub selected_option_ids: Vec<String>,
    /// Free-form answer text.
    #[serde(default)]
    #[validate(length(max = 512))]
    pub value: Option<String>,
    /// Client-observed response time.
    #[validate(range(max = 3_600_000))]
    pub response_time_ms: u64,
}

/// Acknowledgement of an accepted submission; scoring happens asynchronously.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitAnswerResponse {
    /// Client-chosen id of the submission.
    pub answer_id: String,
    /// Whether the submission was queued for scoring.
    pub accepted: bool,
}

/// Moderation request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ParticipantStatusRequest {
    /// New presence status.
    pub status: ParticipantStatus,
}

/// Row of a ranked leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LeaderboardEntry {
    /// One-based rank.
    pub rank: u64,
    /// Participant concerned.
    pub participant_id: Uuid,
    /// Display name chosen at join.
    pub nickname: String,
    /// Running score after the answer.
    pub total_score: i64,
    /// Summed response time, used to break ties.
    pub total_time_ms: u64,
    /// Consecutive correct answers.
    pub streak_count: u32,
}

/// Query string of the leaderboard route.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LeaderboardQuery {
    /// Only return the best `limit` entries.
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<usize>,
}

/// A participant's own standing.
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantStanding {
    /// Participant concerned.
    pub participant_id: Uuid,
    /// One-based rank, when ranked.
    pub rank: Option<u64>,
    /// Running score after the answer.
    pub total_score: i64,
    /// Summed response time, used to break ties.
    pub total_time_ms: u64,
    /// Consecutive correct answers.
    pub streak_count: u32,
}

impl ParticipantStanding {
    /// Combine a stored score and its rank.
    pub fn new(participant_id: Uuid, score: ParticipantScore, rank: Option<u64>) -> Self {
        Self {
            participant_id,
            rank,
            total_score: score.total_score,
            total_time_ms: score.total_time_ms,
            streak_count: score.streak_count,
        }
    }
}

/// FFI winners of a question, or why resolution does not apply.
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FfiResultResponse {
    NotApplicable { reason: String },
    Resolved(FfiRanking),
}

impl From<FfiResolution> for FfiResultResponse {
    fn from(resolution: FfiResolution) -> Self {
        match resolution {
            FfiResolution::NotApplicable(reason) => FfiResultResponse::NotApplicable {
                reason: reason.to_string(),
            },
            FfiResolution::Resolved(ranking) => FfiResultResponse::Resolved(ranking),
        }
    }
}

/// Generic acknowledgement for controller actions.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    /// Session after the action.
    pub session: SessionSummary,
    /// Whether durable writes are currently parked in the fallback queue.
    pub degraded: bool,
}

impl ActionResponse {
    /// Wrap the session reached by an action.
    pub fn new(session: SessionEntity, degraded: bool) -> Self {
        Self {
            session: session.into(),
            degraded,
        }
    }
}
