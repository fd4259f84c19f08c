use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::LateSubmissionPolicy,
    dao::{
        fast_store::FastStore,
        keys,
        models::{
            ExamMode, ParticipantScore, QuestionResult, ScoreBreakdown, ScoredSubmissionEntity,
            SessionEntity, now_ms,
        },
    },
    dto::sse::{AnswerResultEvent, ScoreUpdatedEvent},
    error::ServiceError,
    services::{
        answer_buffer::AnswerBuffer,
        audit::{AuditEvent, AuditSink},
        broadcast::{self, EVENT_ANSWER_RESULT, EVENT_SCORE_UPDATED},
        leaderboard::Leaderboard,
        scores::ScoreBook,
        scoring::{
            batch::AnswerBatcher,
            calculator::{ScoringError, ScoringInput, apply_to_score, calculate},
        },
    },
    state::{
        channels::{Channel, ChannelRegistry},
        quiz::{Question, QuizCatalog},
        session_store::SessionStore,
        state_machine::SessionPhase,
    },
};

/// "An answer is waiting in the buffer" signal sent at ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionNotice {
    /// Session the answer belongs to.
    pub session_id: Uuid,
    /// Submitting participant.
    pub participant_id: Uuid,
    /// Buffer key of the submission.
    pub answer_id: String,
}

/// Result of scoring one submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredAnswer {
    /// Points awarded for the answer.
    pub breakdown: ScoreBreakdown,
    /// Running score after the answer.
    pub score: ParticipantScore,
    /// One-based leaderboard rank after the answer.
    pub rank: Option<u64>,
    /// The calculation failed and a fallback breakdown was applied.
    pub recovered: bool,
}

/// What happened to a submission notice.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringOutcome {
    /// Points were applied.
    Scored(ScoredAnswer),
    /// The answer id was already scored; nothing changed.
    Duplicate,
    /// A collaborator record is missing; the notice was dropped.
    Skipped(&'static str),
    /// Late submission refused by policy.
    Rejected,
}

/// Collaborators of the scoring pipeline.
pub struct PipelineDeps {
    /// Store holding scored-answer markers and question results.
    pub fast: Arc<dyn FastStore>,
    /// Session lookups for phase and exam mode.
    pub sessions: Arc<SessionStore>,
    /// Source of buffered submissions.
    pub answers: Arc<AnswerBuffer>,
    /// Running scores.
    pub scores: ScoreBook,
    /// Ranked standings updated after every answer.
    pub leaderboard: Arc<Leaderboard>,
    /// Question definitions.
    pub catalog: Arc<dyn QuizCatalog>,
    /// Durable persistence of scored answers.
    pub batcher: Arc<AnswerBatcher>,
    /// Per-participant result delivery.
    pub channels: Arc<ChannelRegistry>,
    /// Recipient of calculation failures.
    pub audit: Arc<dyn AuditSink>,
    /// What to do with answers that arrive after their question closed.
    pub late_submissions: LateSubmissionPolicy,
}

/// Scores submissions with one worker per live session.
///
/// Inside a session worker every participant gets a lane of its own, so
/// answers of one participant are applied in arrival order while different
/// participants are scored concurrently.
pub struct ScoringPipeline {
    deps: PipelineDeps,
    workers: DashMap<Uuid, mpsc::UnboundedSender<SubmissionNotice>>,
    participant_locks: DashMap<(Uuid, Uuid), Arc<Mutex<()>>>,
    questions: DashMap<(Uuid, Uuid), Arc<Question>>,
    exam_modes: DashMap<Uuid, ExamMode>,
    last_valid: DashMap<(Uuid, Uuid), ScoreBreakdown>,
}

impl ScoringPipeline {
    /// Build a pipeline over its collaborators.
    pub fn new(deps: PipelineDeps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            workers: DashMap::new(),
            participant_locks: DashMap::new(),
            questions: DashMap::new(),
            exam_modes: DashMap::new(),
            last_valid: DashMap::new(),
        })
    }

    /// Queue a notice on its session worker, starting the worker if needed.
    pub fn notify(self: &Arc<Self>, notice: SubmissionNotice) {
        let session_id = notice.session_id;
        let sender = self
            .workers
            .entry(session_id)
            .or_insert_with(|| self.spawn_worker(session_id))
            .clone();

        if let Err(err) = sender.send(notice) {
            // worker gone (session stopped in between); start a fresh one
            let fresh = self.spawn_worker(session_id);
            if fresh.send(err.0).is_ok() {
                self.workers.insert(session_id, fresh);
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, session_id: Uuid) -> mpsc::UnboundedSender<SubmissionNotice> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SubmissionNotice>();
        let pipeline = Arc::downgrade(self);
        tokio::spawn(async move {
            debug!(%session_id, "scoring worker started");
            let mut lanes: HashMap<Uuid, mpsc::UnboundedSender<SubmissionNotice>> = HashMap::new();
            while let Some(notice) = rx.recv().await {
                let participant_id = notice.participant_id;
                let lane = lanes
                    .entry(participant_id)
                    .or_insert_with(|| spawn_lane(pipeline.clone()));
                if let Err(err) = lane.send(notice) {
                    let fresh = spawn_lane(pipeline.clone());
                    let _ = fresh.send(err.0);
                    lanes.insert(participant_id, fresh);
                }
            }
            debug!(%session_id, "scoring worker stopped");
        });
        tx
    }

    async fn handle(&self, notice: SubmissionNotice) {
        match self.process(&notice).await {
            Ok(ScoringOutcome::Scored(scored)) => debug!(
                session_id = %notice.session_id,
                participant_id = %notice.participant_id,
                answer_id = %notice.answer_id,
                total = scored.breakdown.total,
                rank = ?scored.rank,
                "answer scored"
            ),
            Ok(outcome) => debug!(
                session_id = %notice.session_id,
                participant_id = %notice.participant_id,
                answer_id = %notice.answer_id,
                ?outcome,
                "answer not scored"
            ),
            Err(err) => warn!(
                session_id = %notice.session_id,
                participant_id = %notice.participant_id,
                answer_id = %notice.answer_id,
                error = %err,
                "failed to score answer"
            ),
        }
    }

    /// Score one buffered submission.
    ///
    /// The read-modify-write of the participant's running score happens
    /// under a per-participant lock. Store failures are returned; calculation
    /// failures are recovered with the last valid breakdown.
    pub async fn process(&self, notice: &SubmissionNotice) -> Result<ScoringOutcome, ServiceError> {
        let session_id = notice.session_id;
        let participant_id = notice.participant_id;
        let lock = self
            .participant_locks
            .entry((session_id, participant_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _held = lock.lock().await;

        let Some(record) = self.deps.answers.get(session_id, &notice.answer_id).await? else {
            warn!(%session_id, %participant_id, answer_id = %notice.answer_id, "answer missing from buffer");
            return Ok(ScoringOutcome::Skipped("answer not buffered"));
        };
        if record.participant_id != participant_id {
            warn!(%session_id, %participant_id, answer_id = %notice.answer_id, "answer belongs to another participant");
            return Ok(ScoringOutcome::Skipped("answer belongs to another participant"));
        }

        let scored_key = keys::scored_answers(session_id);
        if self.deps.fast.hash_get(&scored_key, &record.answer_id).await?.is_some() {
            return Ok(ScoringOutcome::Duplicate);
        }

        let Some(session) = self.deps.sessions.get(session_id).await? else {
            warn!(%session_id, answer_id = %record.answer_id, "session missing while scoring");
            return Ok(ScoringOutcome::Skipped("session not found"));
        };
        let question_id = record.question_id;
        if self.deps.late_submissions == LateSubmissionPolicy::Reject
            && !(session.state == SessionPhase::ActiveQuestion
                && session.current_question_id == Some(question_id))
        {
            info!(%session_id, %participant_id, %question_id, answer_id = %record.answer_id, "late submission rejected");
            return Ok(ScoringOutcome::Rejected);
        }

        let Some(question) = self.question(&session, question_id).await? else {
            warn!(%session_id, %question_id, answer_id = %record.answer_id, "question missing while scoring");
            return Ok(ScoringOutcome::Skipped("question not found"));
        };
        let exam_mode = self.exam_mode(&session);
        let current = self.deps.scores.get(session_id, participant_id).await?;

        let input = ScoringInput {
            question: &question,
            selected_option_ids: &record.selected_option_ids,
            value: record.value.as_deref(),
            response_time_ms: record.response_time_ms,
            current: &current,
            exam_mode: &exam_mode,
        };
        let (breakdown, recovered) = match guarded_calculate(&input) {
            Ok(breakdown) => {
                self.last_valid.insert((session_id, participant_id), breakdown);
                (breakdown, false)
            }
            Err(err) => {
                error!(
                    %session_id,
                    %participant_id,
                    %question_id,
                    answer_id = %record.answer_id,
                    error = %err,
                    "score calculation failed; using last valid breakdown"
                );
                self.deps.audit.record(AuditEvent::ScoringFailure {
                    session_id,
                    participant_id,
                    question_id,
                    answer_id: record.answer_id.clone(),
                    error: err.to_string(),
                });
                let fallback = self
                    .last_valid
                    .get(&(session_id, participant_id))
                    .map(|entry| *entry.value())
                    .unwrap_or_default();
                (fallback, true)
            }
        };

        let score = apply_to_score(&current, &breakdown, record.response_time_ms);
        // marker first; released again when the score write fails
        self.deps
            .fast
            .hash_set(&scored_key, &record.answer_id, serde_json::to_string(&breakdown)?)
            .await?;
        if let Err(err) = self.deps.scores.put(session_id, participant_id, &score).await {
            if let Err(rollback) = self.deps.fast.hash_delete(&scored_key, &record.answer_id).await {
                error!(%session_id, %participant_id, answer_id = %record.answer_id, error = %rollback, "failed to release scored marker; answer will not be retried");
            }
            return Err(err);
        }
        let result = QuestionResult {
            is_correct: breakdown.is_correct,
            points: breakdown.total,
            response_time_ms: record.response_time_ms,
        };
        self.deps
            .fast
            .hash_set(
                &keys::question_results(session_id, question_id),
                &participant_id.to_string(),
                serde_json::to_string(&result)?,
            )
            .await?;

        self.deps.leaderboard.update(session_id, participant_id).await?;
        let rank = self.deps.leaderboard.rank_of(session_id, participant_id).await?;

        let answer_id = record.answer_id.clone();
        if let Err(err) = self
            .deps
            .batcher
            .push(ScoredSubmissionEntity {
                submission: record,
                score: breakdown,
                total_score_after: score.total_score,
                scored_at_ms: now_ms(),
            })
            .await
        {
            warn!(%session_id, %participant_id, %answer_id, error = %err, "failed to queue scored answer for persistence");
        }

        let channel = Channel::Participant {
            session_id,
            participant_id,
        };
        broadcast::publish(
            &self.deps.channels,
            channel,
            EVENT_ANSWER_RESULT,
            &AnswerResultEvent {
                answer_id,
                question_id,
                is_correct: breakdown.is_correct,
                score: breakdown,
                total_score: score.total_score,
            },
        );
        broadcast::publish(
            &self.deps.channels,
            channel,
            EVENT_SCORE_UPDATED,
            &ScoreUpdatedEvent {
                participant_id,
                total_score: score.total_score,
                rank,
                streak: score.streak_count,
            },
        );

        Ok(ScoringOutcome::Scored(ScoredAnswer {
            breakdown,
            score,
            rank,
            recovered,
        }))
    }

    async fn question(
        &self,
        session: &SessionEntity,
        question_id: Uuid,
    ) -> Result<Option<Arc<Question>>, ServiceError> {
        let key = (session.id, question_id);
        if let Some(question) = self.questions.get(&key) {
            return Ok(Some(question.value().clone()));
        }
        let found = self
            .deps
            .catalog
            .get_question_by_id(session.quiz_id, question_id)
            .await?;
        if let Some(question) = &found {
            self.questions.insert(key, question.clone());
        }
        Ok(found)
    }

    fn exam_mode(&self, session: &SessionEntity) -> ExamMode {
        self.exam_modes
            .entry(session.id)
            .or_insert_with(|| session.exam_mode.clone())
            .clone()
    }

    /// A new round began: drop cached questions of earlier rounds.
    pub fn on_round_started(&self, session_id: Uuid, question: Arc<Question>) {
        self.questions.retain(|(session, _), _| *session != session_id);
        self.questions.insert((session_id, question.id), question);
    }

    /// Stop the session worker and drop every cache entry of the session.
    pub fn stop_session(&self, session_id: Uuid) {
        if self.workers.remove(&session_id).is_some() {
            info!(%session_id, "scoring worker released");
        }
        self.questions.retain(|(session, _), _| *session != session_id);
        self.exam_modes.remove(&session_id);
        self.last_valid.retain(|(session, _), _| *session != session_id);
        self.participant_locks.retain(|(session, _), _| *session != session_id);
    }

    /// Live session workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn spawn_lane(pipeline: Weak<ScoringPipeline>) -> mpsc::UnboundedSender<SubmissionNotice> {
    let (tx, mut rx) = mpsc::unbounded_channel::<SubmissionNotice>();
    tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            let Some(pipeline) = pipeline.upgrade() else {
                break;
            };
            pipeline.handle(notice).await;
        }
    });
    tx
}

fn guarded_calculate(input: &ScoringInput<'_>) -> Result<ScoreBreakdown, ScoringFailure> {
    match catch_unwind(AssertUnwindSafe(|| calculate(input))) {
        Ok(result) => result.map_err(ScoringFailure::Math),
        Err(_) => Err(ScoringFailure::Panicked),
    }
}

#[derive(Debug, thiserror::Error)]
enum ScoringFailure {
    #[error(transparent)]
    Math(ScoringError),
    #[error("score calculation panicked")]
    Panicked,
}
