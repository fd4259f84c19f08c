use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::state_machine::SessionPhase;

/// Durable collection holding session lifecycle records.
pub const SESSIONS_COLLECTION: &str = "sessions";
/// Durable collection holding scored submissions.
pub const ANSWERS_COLLECTION: &str = "answers";
/// Durable collection holding quiz definitions.
pub const QUIZZES_COLLECTION: &str = "quizzes";

/// Exam-mode switches configured per session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ExamMode {
    /// Deduct points for wrong answers.
    #[serde(default)]
    pub negative_marking: bool,
    /// Share of the base points deducted on a wrong answer (0..=100).
    #[serde(default)]
    pub negative_marking_percentage: u8,
    /// Move to the next question automatically after the reveal.
    #[serde(default)]
    pub auto_advance: bool,
    /// Skip the reveal pause when auto-advancing.
    #[serde(default)]
    pub skip_reveal: bool,
}

/// Lifecycle record for a live quiz session, mirrored in both stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntity {
    /// Stable identifier for the session.
    pub id: Uuid,
    /// Quiz being played.
    pub quiz_id: Uuid,
    /// Short code participants type to join.
    pub join_code: String,
    /// Current lifecycle phase.
    pub state: SessionPhase,
    /// Index of the active (or last revealed) question.
    pub current_question_index: Option<usize>,
    /// Identifier of the active (or last revealed) question.
    pub current_question_id: Option<Uuid>,
    /// Number of participants that joined.
    pub participant_count: u32,
    /// Whether participants may join after the lobby closed.
    pub allow_late_joiners: bool,
    /// Scoring and flow switches.
    pub exam_mode: ExamMode,
    /// Creation timestamp (unix milliseconds).
    pub created_at_ms: i64,
    /// Last mutation timestamp (unix milliseconds).
    pub updated_at_ms: i64,
}

/// Moderation status of a participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Connected or allowed to reconnect.
    Active,
    /// Last stream dropped; may come back.
    Disconnected,
    /// Removed by the host; submissions are refused.
    Kicked,
    /// Removed and barred from rejoining under the same nickname.
    Banned,
}

impl ParticipantStatus {
    /// Whether the participant may still submit answers.
    pub fn can_submit(self) -> bool {
        matches!(self, ParticipantStatus::Active | ParticipantStatus::Disconnected)
    }
}

/// Participant-session record held in the fast store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ParticipantEntity {
    /// Identifier handed to the participant at join time.
    pub id: Uuid,
    /// Display name.
    pub nickname: String,
    /// Moderation status.
    pub status: ParticipantStatus,
    /// Join timestamp (unix milliseconds).
    pub joined_at_ms: i64,
}

/// Running score of a participant within one session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantScore {
    /// Accumulated points, never negative.
    pub total_score: i64,
    /// Sum of response times of every scored answer.
    pub total_time_ms: u64,
    /// Consecutive fully-correct answers.
    pub streak_count: u32,
    /// Points delta of the most recent scored answer.
    pub last_question_score: i64,
}

/// Point breakdown of one scored submission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ScoreBreakdown {
    /// Points for a fully correct answer.
    pub base_points: i64,
    /// Time-decaying bonus.
    pub speed_bonus: i64,
    /// Bonus for consecutive correct answers.
    pub streak_bonus: i64,
    /// Proportional credit for a subset of the correct options.
    pub partial_credit: i64,
    /// Points removed by negative marking.
    pub negative_deduction: i64,
    /// Net delta applied to the running score.
    pub total: i64,
    /// Whether the answer was fully correct.
    pub is_correct: bool,
    /// Streak after this answer.
    pub streak: u32,
}

/// Answer exactly as submitted by a participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionRecord {
    /// Client-generated idempotency key.
    pub answer_id: String,
    /// Submitting participant.
    pub participant_id: Uuid,
    /// Question being answered.
    pub question_id: Uuid,
    /// Session the answer belongs to.
    pub session_id: Uuid,
    /// Selected option identifiers.
    #[serde(default)]
    pub selected_option_ids: Vec<String>,
    /// Free-form answer value.
    #[serde(default)]
    pub value: Option<String>,
    /// Response time observed by the client.
    pub response_time_ms: u64,
    /// Server wall-clock at ingestion (unix milliseconds).
    pub submitted_at_ms: i64,
}

/// Submission enriched with its score, persisted in batches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoredSubmissionEntity {
    /// Original submission.
    #[serde(flatten)]
    pub submission: SubmissionRecord,
    /// Computed point breakdown.
    pub score: ScoreBreakdown,
    /// Running score after this answer.
    pub total_score_after: i64,
    /// Scoring timestamp (unix milliseconds).
    pub scored_at_ms: i64,
}

/// Outcome of a participant on one question, kept for FFI resolution and
/// reveal statistics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionResult {
    /// Whether the answer was fully correct.
    pub is_correct: bool,
    /// Net points of the answer.
    pub points: i64,
    /// Response time observed by the client.
    pub response_time_ms: u64,
}

/// Kind of quiz, deciding how winners are resolved.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuizType {
    /// Every participant scores on every question.
    #[default]
    Standard,
    /// Fastest finger first: the first N correct answers win.
    Ffi,
}

/// Answer option of a question, including the answer key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionEntity {
    /// Identifier referenced by submissions.
    pub id: String,
    /// Label displayed to participants.
    pub text: String,
    /// Answer key flag; never sent before the reveal.
    #[serde(default)]
    pub is_correct: bool,
}

/// Question definition with its scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Question prompt.
    pub text: String,
    /// Available options (empty for free-form questions).
    #[serde(default)]
    pub options: Vec<OptionEntity>,
    /// Accepted values for free-form questions.
    #[serde(default)]
    pub accepted_answers: Vec<String>,
    /// Points for a fully correct answer.
    pub base_points: u32,
    /// Speed bonus multiplier; zero disables it.
    #[serde(default)]
    pub speed_bonus_multiplier: f64,
    /// Whether partial credit applies.
    #[serde(default)]
    pub partial_credit: bool,
    /// Answering window in seconds.
    pub time_limit_secs: u32,
    /// Whether each participant sees an independently shuffled option order.
    #[serde(default)]
    pub shuffle_options: bool,
}

/// Fastest-finger-first settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FfiSettings {
    /// How many correct answers win each question.
    pub winners_per_question: u32,
}

/// Quiz definition as stored in the `quizzes` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizEntity {
    /// Stable identifier.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// Winner resolution mode.
    #[serde(default)]
    pub quiz_type: QuizType,
    /// FFI settings, required when `quiz_type` is `ffi`.
    #[serde(default)]
    pub ffi: Option<FfiSettings>,
    /// Ordered questions.
    pub questions: Vec<QuestionEntity>,
}

/// Write sent to the durable store, replayable from the fallback queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum WriteOperation {
    /// Insert a single document.
    InsertOne { collection: String, document: Value },
    /// Insert several documents in one round trip.
    InsertMany {
        collection: String,
        documents: Vec<Value>,
    },
    /// Replace (or upsert) the document with the given id.
    ReplaceOne {
        collection: String,
        id: String,
        document: Value,
    },
    /// Apply a `$set` of fields to documents matching `filter`.
    UpdateOne {
        collection: String,
        filter: Value,
        set: Value,
    },
}

impl WriteOperation {
    /// Target collection name.
    pub fn collection(&self) -> &str {
        match self {
            WriteOperation::InsertOne { collection, .. }
            | WriteOperation::InsertMany { collection, .. }
            | WriteOperation::ReplaceOne { collection, .. }
            | WriteOperation::UpdateOne { collection, .. } => collection,
        }
    }

    /// Short operation name used in logs and pending-write records.
    pub fn name(&self) -> &'static str {
        match self {
            WriteOperation::InsertOne { .. } => "insert_one",
            WriteOperation::InsertMany { .. } => "insert_many",
            WriteOperation::ReplaceOne { .. } => "replace_one",
            WriteOperation::UpdateOne { .. } => "update_one",
        }
    }

    /// Document identifiers touched by this write, when known.
    pub fn document_ids(&self) -> Vec<String> {
        fn id_of(document: &Value) -> Option<String> {
            match document.get("id")? {
                Value::String(id) => Some(id.clone()),
                other => Some(other.to_string()),
            }
        }

        match self {
            WriteOperation::InsertOne { document, .. } => id_of(document).into_iter().collect(),
            WriteOperation::InsertMany { documents, .. } => {
                documents.iter().filter_map(id_of).collect()
            }
            WriteOperation::ReplaceOne { id, .. } => vec![id.clone()],
            WriteOperation::UpdateOne { .. } => Vec::new(),
        }
    }
}

/// Durable write parked in the fast store while the durable store is down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingWrite {
    /// Identifier of the parked write.
    pub id: Uuid,
    /// The write itself (collection, operation, document or filter).
    #[serde(flatten)]
    pub operation: WriteOperation,
    /// When the write was parked (unix milliseconds).
    pub timestamp_ms: i64,
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
