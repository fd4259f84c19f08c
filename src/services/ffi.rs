use std::{collections::HashMap, sync::Arc};

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::FfiConfig,
    dao::{
        fast_store::FastStore,
        keys,
        models::{QuestionResult, QuizType},
    },
    error::ServiceError,
    state::quiz::Quiz,
};

/// Position of one submitter in a fastest-finger-first race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FfiRankEntry {
    /// Submitting participant.
    pub participant_id: Uuid,
    /// One-based arrival rank.
    pub rank: u32,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Whether the answer took one of the winner slots.
    pub is_winner: bool,
    /// Arrival timestamp (unix milliseconds).
    pub timestamp_ms: i64,
}

/// Full arrival ranking of a question plus its winners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct FfiRanking {
    /// Every submitter in arrival order.
    pub ranking: Vec<FfiRankEntry>,
    /// Winners in arrival order.
    pub winners: Vec<Uuid>,
}

/// Result of winner resolution. `NotApplicable` is distinct from an empty ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfiResolution {
    /// The quiz is not FFI, or it lacks a winner count.
    NotApplicable(&'static str),
    /// Winners resolved (possibly none).
    Resolved(FfiRanking),
}

/// Mark the first `winners_per_question` correct submissions, in arrival
/// order, as winners. Incorrect submissions are ranked but take no slot.
pub fn rank_submissions(
    order: &[(Uuid, i64)],
    correctness: &HashMap<Uuid, bool>,
    winners_per_question: u32,
) -> FfiRanking {
    let mut slots_left = winners_per_question;
    let mut ranking = Vec::with_capacity(order.len());
    let mut winners = Vec::new();

    for (index, (participant_id, timestamp_ms)) in order.iter().enumerate() {
        let is_correct = correctness.get(participant_id).copied().unwrap_or(false);
        let is_winner = is_correct && slots_left > 0;
        if is_winner {
            slots_left -= 1;
            winners.push(*participant_id);
        }
        ranking.push(FfiRankEntry {
            participant_id: *participant_id,
            rank: index as u32 + 1,
            is_correct,
            is_winner,
            timestamp_ms: *timestamp_ms,
        });
    }

    FfiRanking { ranking, winners }
}

/// Records arrival order per question and resolves FFI winners.
pub struct FfiResolver {
    fast: Arc<dyn FastStore>,
    config: FfiConfig,
}

impl FfiResolver {
    /// Build a resolver over the given fast store.
    pub fn new(fast: Arc<dyn FastStore>, config: FfiConfig) -> Self {
        Self { fast, config }
    }

    /// Record a participant's first arrival for a question. Returns `false`
    /// when an arrival was already recorded; the original timestamp is kept.
    pub async fn track_submission(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        participant_id: Uuid,
        timestamp_ms: i64,
    ) -> Result<bool, ServiceError> {
        let key = keys::submission_order(session_id, question_id);
        let first = self
            .fast
            .sorted_add(&key, &participant_id.to_string(), timestamp_ms as f64, true)
            .await?;
        self.fast.expire(&key, self.config.order_ttl).await?;
        Ok(first)
    }

    /// Distinct participants that submitted for a question.
    pub async fn submission_count(&self, session_id: Uuid, question_id: Uuid) -> Result<u64, ServiceError> {
        Ok(self
            .fast
            .sorted_len(&keys::submission_order(session_id, question_id))
            .await?)
    }

    /// Resolve the winners of a question.
    pub async fn resolve_winners(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        quiz: &Quiz,
    ) -> Result<FfiResolution, ServiceError> {
        if quiz.quiz_type != QuizType::Ffi {
            return Ok(FfiResolution::NotApplicable("quiz is not fastest-finger-first"));
        }
        let Some(settings) = quiz.ffi.filter(|settings| settings.winners_per_question > 0) else {
            return Ok(FfiResolution::NotApplicable("quiz has no winner count configured"));
        };

        let order: Vec<(Uuid, i64)> = self
            .fast
            .sorted_range(&keys::submission_order(session_id, question_id), 0, -1, false)
            .await?
            .into_iter()
            .filter_map(|(member, timestamp)| {
                Uuid::parse_str(&member).ok().map(|id| (id, timestamp as i64))
            })
            .collect();

        let correctness: HashMap<Uuid, bool> = self
            .fast
            .hash_get_all(&keys::question_results(session_id, question_id))
            .await?
            .into_iter()
            .filter_map(|(field, raw)| {
                let participant_id = Uuid::parse_str(&field).ok()?;
                let result: QuestionResult = serde_json::from_str(&raw).ok()?;
                Some((participant_id, result.is_correct))
            })
            .collect();

        Ok(FfiResolution::Resolved(rank_submissions(
            &order,
            &correctness,
            settings.winners_per_question,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::FfiSettings;

    fn arrivals(count: usize) -> Vec<(Uuid, i64)> {
        (0..count)
            .map(|index| (Uuid::new_v4(), 1_000 + index as i64))
            .collect()
    }

    #[test]
    fn first_three_correct_win() {
        let order = arrivals(5);
        let correctness: HashMap<_, _> = order
            .iter()
            .enumerate()
            .map(|(index, (id, _))| (*id, index < 4))
            .collect();

        let ranking = rank_submissions(&order, &correctness, 3);
        assert_eq!(ranking.winners, vec![order[0].0, order[1].0, order[2].0]);
        assert!(!ranking.ranking[3].is_winner);
        assert!(ranking.ranking[3].is_correct);
        assert!(!ranking.ranking[4].is_winner);
        assert_eq!(ranking.ranking[4].rank, 5);
    }

    #[test]
    fn incorrect_answers_take_no_slot() {
        let order = arrivals(3);
        let correctness: HashMap<_, _> =
            [(order[0].0, false), (order[1].0, true), (order[2].0, true)].into();

        let ranking = rank_submissions(&order, &correctness, 1);
        assert_eq!(ranking.winners, vec![order[1].0]);
    }

    #[test]
    fn fewer_correct_than_slots_all_win() {
        let order = arrivals(2);
        let correctness: HashMap<_, _> = order.iter().map(|(id, _)| (*id, true)).collect();
        let ranking = rank_submissions(&order, &correctness, 3);
        assert_eq!(ranking.winners.len(), 2);
    }

    #[test]
    fn zero_submissions_give_empty_ranking() {
        let ranking = rank_submissions(&[], &HashMap::new(), 3);
        assert!(ranking.ranking.is_empty());
        assert!(ranking.winners.is_empty());
    }

    fn quiz(quiz_type: QuizType, ffi: Option<FfiSettings>) -> Quiz {
        Quiz {
            id: Uuid::new_v4(),
            title: "quiz".into(),
            quiz_type,
            ffi,
            questions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn non_ffi_quiz_is_not_applicable() {
        let resolver = FfiResolver::new(
            Arc::new(crate::dao::fast_store::memory::MemoryFastStore::new()),
            FfiConfig::default(),
        );
        let (session_id, question_id) = (Uuid::new_v4(), Uuid::new_v4());

        let standard = resolver
            .resolve_winners(session_id, question_id, &quiz(QuizType::Standard, None))
            .await
            .unwrap();
        assert!(matches!(standard, FfiResolution::NotApplicable(_)));

        let unconfigured = resolver
            .resolve_winners(session_id, question_id, &quiz(QuizType::Ffi, None))
            .await
            .unwrap();
        assert!(matches!(unconfigured, FfiResolution::NotApplicable(_)));

        let empty = resolver
            .resolve_winners(
                session_id,
                question_id,
                &quiz(QuizType::Ffi, Some(FfiSettings { winners_per_question: 2 })),
            )
            .await
            .unwrap();
        assert_eq!(empty, FfiResolution::Resolved(FfiRanking::default()));
    }

    #[tokio::test]
    async fn arrival_order_is_kept_per_participant() {
        let resolver = FfiResolver::new(
            Arc::new(crate::dao::fast_store::memory::MemoryFastStore::new()),
            FfiConfig::default(),
        );
        let (session_id, question_id) = (Uuid::new_v4(), Uuid::new_v4());
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(resolver.track_submission(session_id, question_id, second, 2_000).await.unwrap());
        assert!(resolver.track_submission(session_id, question_id, first, 1_000).await.unwrap());
        assert!(!resolver.track_submission(session_id, question_id, first, 3_000).await.unwrap());

        assert_eq!(resolver.submission_count(session_id, question_id).await.unwrap(), 2);
        let resolution = resolver
            .resolve_winners(
                session_id,
                question_id,
                &quiz(QuizType::Ffi, Some(FfiSettings { winners_per_question: 1 })),
            )
            .await
            .unwrap();
        let FfiResolution::Resolved(ranking) = resolution else {
            panic!("expected a resolved ranking");
        };
        assert_eq!(ranking.ranking[0].participant_id, first);
        assert_eq!(ranking.ranking[0].timestamp_ms, 1_000);
        assert!(ranking.winners.is_empty());
    }
}
