use std::{collections::HashMap, sync::Arc};

use uuid::Uuid;

use crate::{
    dao::{
        fast_store::FastStore,
        keys,
        models::{ParticipantEntity, ParticipantScore},
    },
    dto::session::LeaderboardEntry,
    error::ServiceError,
    services::scores::ScoreBook,
};

/// Composite sort key: higher score first, lower cumulative time breaks ties.
pub fn rank_score(score: &ParticipantScore) -> f64 {
    score.total_score as f64 - score.total_time_ms as f64 / 1e9
}

/// Ranked view over the running scores of a session.
pub struct Leaderboard {
    fast: Arc<dyn FastStore>,
    scores: ScoreBook,
}

impl Leaderboard {
    /// Build a leaderboard reading scores from `scores`.
    pub fn new(fast: Arc<dyn FastStore>, scores: ScoreBook) -> Self {
        Self { fast, scores }
    }

    /// Recompute a participant's rank score from the stored score and upsert it.
    pub async fn update(&self, session_id: Uuid, participant_id: Uuid) -> Result<f64, ServiceError> {
        // re-read after the score write so the entry never lags behind
        let score = self.scores.get(session_id, participant_id).await?;
        let rank = rank_score(&score);
        self.fast
            .sorted_add(
                &keys::leaderboard(session_id),
                &participant_id.to_string(),
                rank,
                false,
            )
            .await?;
        Ok(rank)
    }

    /// Best `n` entries.
    pub async fn top_n(&self, session_id: Uuid, n: usize) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(n - 1).unwrap_or(isize::MAX);
        self.read(session_id, stop).await
    }

    /// Every entry, best first.
    pub async fn full(&self, session_id: Uuid) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        self.read(session_id, -1).await
    }

    /// One-based rank of a participant, `None` when not ranked yet.
    pub async fn rank_of(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Option<u64>, ServiceError> {
        let rank = self
            .fast
            .sorted_rank(
                &keys::leaderboard(session_id),
                &participant_id.to_string(),
                true,
            )
            .await?;
        Ok(rank.map(|zero_based| zero_based + 1))
    }

    /// Number of ranked participants.
    pub async fn len(&self, session_id: Uuid) -> Result<u64, ServiceError> {
        Ok(self.fast.sorted_len(&keys::leaderboard(session_id)).await?)
    }

    async fn read(&self, session_id: Uuid, stop: isize) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        let ranked = self
            .fast
            .sorted_range(&keys::leaderboard(session_id), 0, stop, true)
            .await?;
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let scores: HashMap<Uuid, ParticipantScore> =
            self.scores.all(session_id).await?.into_iter().collect();
        let nicknames: HashMap<Uuid, String> = self
            .fast
            .hash_get_all(&keys::participants(session_id))
            .await?
            .into_iter()
            .filter_map(|(_, raw)| serde_json::from_str::<ParticipantEntity>(&raw).ok())
            .map(|participant| (participant.id, participant.nickname))
            .collect();

        Ok(ranked
            .into_iter()
            .filter_map(|(member, _)| Uuid::parse_str(&member).ok())
            .enumerate()
            .map(|(index, participant_id)| {
                let score = scores.get(&participant_id).copied().unwrap_or_default();
                LeaderboardEntry {
                    rank: index as u64 + 1,
                    participant_id,
                    nickname: nicknames.get(&participant_id).cloned().unwrap_or_default(),
                    total_score: score.total_score,
                    total_time_ms: score.total_time_ms,
                    streak_count: score.streak_count,
                }
            })
            .collect())
    }
}
