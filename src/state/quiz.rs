use std::{collections::HashSet, sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::{BoxFuture, ready};
use uuid::Uuid;

use crate::{
    dao::models::{FfiSettings, OptionEntity, QuestionEntity, QuizEntity, QuizType},
    error::ServiceError,
};

/// Runtime representation of a quiz with its questions in play order.
#[derive(Debug, Clone)]
pub struct Quiz {
    /// Stable identifier.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// Winner resolution mode.
    pub quiz_type: QuizType,
    /// FFI settings when the quiz is fastest-finger-first.
    pub ffi: Option<FfiSettings>,
    /// Questions, shared with the scoring caches.
    pub questions: Vec<Arc<Question>>,
}

/// Answer option including the answer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionOption {
    /// Option id referenced by submissions.
    pub id: String,
    /// Display text.
    pub text: String,
    /// Part of the answer key.
    pub is_correct: bool,
}

/// Scoring configuration and content of one question.
#[derive(Debug, Clone)]
pub struct Question {
    /// Stable identifier.
    pub id: Uuid,
    /// Prompt shown to participants.
    pub text: String,
    /// Options in canonical order.
    pub options: Vec<QuestionOption>,
    /// Accepted free-form values.
    pub accepted_answers: Vec<String>,
    /// Points for a fully correct answer.
    pub base_points: u32,
    /// Speed bonus multiplier; zero disables it.
    pub speed_bonus_multiplier: f64,
    /// Whether partial credit applies.
    pub partial_credit: bool,
    /// Answering window.
    pub time_limit: Duration,
    /// Whether participants get independently shuffled option orders.
    pub shuffle_options: bool,
}

impl Question {
    /// Identifiers of the options flagged correct.
    pub fn correct_option_ids(&self) -> HashSet<&str> {
        self.options
            .iter()
            .filter(|option| option.is_correct)
            .map(|option| option.id.as_str())
            .collect()
    }

    /// Whether the question is answered with a free-form value.
    pub fn is_free_form(&self) -> bool {
        self.options.is_empty()
    }
}

impl Quiz {
    /// Question at `index` in play order.
    pub fn question_at(&self, index: usize) -> Option<Arc<Question>> {
        self.questions.get(index).cloned()
    }

    /// Question with the given identifier.
    pub fn question(&self, id: Uuid) -> Option<Arc<Question>> {
        self.questions
            .iter()
            .find(|question| question.id == id)
            .cloned()
    }
}

impl From<OptionEntity> for QuestionOption {
    fn from(value: OptionEntity) -> Self {
        Self {
            id: value.id,
            text: value.text,
            is_correct: value.is_correct,
        }
    }
}

impl From<QuestionEntity> for Question {
    fn from(value: QuestionEntity) -> Self {
        Self {
            id: value.id,
            text: value.text,
            options: value.options.into_iter().map(Into::into).collect(),
            accepted_answers: value.accepted_answers,
            base_points: value.base_points,
            speed_bonus_multiplier: value.speed_bonus_multiplier,
            partial_credit: value.partial_credit,
            time_limit: Duration::from_secs(u64::from(value.time_limit_secs)),
            shuffle_options: value.shuffle_options,
        }
    }
}

impl From<QuizEntity> for Quiz {
    fn from(value: QuizEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            quiz_type: value.quiz_type,
            ffi: value.ffi,
            questions: value
                .questions
                .into_iter()
                .map(|question| Arc::new(question.into()))
                .collect(),
        }
    }
}

/// Read access to quiz content and per-question scoring configuration.
pub trait QuizCatalog: Send + Sync {
    fn get_quiz(&self, id: Uuid) -> BoxFuture<'static, Result<Option<Arc<Quiz>>, ServiceError>>;
    /// Register or replace a quiz definition.
    fn upsert_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, Result<(), ServiceError>>;

    /// Look up a single question of a quiz.
    fn get_question_by_id(
        &self,
        quiz_id: Uuid,
        question_id: Uuid,
    ) -> BoxFuture<'static, Result<Option<Arc<Question>>, ServiceError>> {
        let quiz = self.get_quiz(quiz_id);
        Box::pin(async move { Ok(quiz.await?.and_then(|quiz| quiz.question(question_id))) })
    }
}

/// Catalog holding quizzes in memory.
#[derive(Default)]
pub struct MemoryQuizCatalog {
    quizzes: DashMap<Uuid, Arc<Quiz>>,
}

impl MemoryQuizCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a quiz.
    pub fn insert(&self, quiz: QuizEntity) {
        let quiz: Quiz = quiz.into();
        self.quizzes.insert(quiz.id, Arc::new(quiz));
    }
}

impl QuizCatalog for MemoryQuizCatalog {
    fn get_quiz(&self, id: Uuid) -> BoxFuture<'static, Result<Option<Arc<Quiz>>, ServiceError>> {
        let found = self.quizzes.get(&id).map(|quiz| quiz.value().clone());
        Box::pin(ready(Ok(found)))
    }

    fn upsert_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, Result<(), ServiceError>> {
        self.insert(quiz);
        Box::pin(ready(Ok(())))
    }
}
