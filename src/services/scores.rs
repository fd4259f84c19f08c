use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{fast_store::FastStore, keys, models::ParticipantScore},
    error::ServiceError,
};

/// Running scores of every participant, one hash per session.
#[derive(Clone)]
pub struct ScoreBook {
    fast: Arc<dyn FastStore>,
}

impl ScoreBook {
    /// Build a score book over the given fast store.
    pub fn new(fast: Arc<dyn FastStore>) -> Self {
        Self { fast }
    }

    /// Current score of a participant; zero when nothing was scored yet.
    pub async fn get(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<ParticipantScore, ServiceError> {
        let raw = self
            .fast
            .hash_get(&keys::scores(session_id), &participant_id.to_string())
            .await?;
        Ok(match raw {
            Some(raw) => serde_json::from_str(&raw)?,
            None => ParticipantScore::default(),
        })
    }

    /// Overwrite a participant's score.
    pub async fn put(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        score: &ParticipantScore,
    ) -> Result<(), ServiceError> {
        self.fast
            .hash_set(
                &keys::scores(session_id),
                &participant_id.to_string(),
                serde_json::to_string(score)?,
            )
            .await?;
        Ok(())
    }

    /// Every score recorded for a session.
    pub async fn all(&self, session_id: Uuid) -> Result<Vec<(Uuid, ParticipantScore)>, ServiceError> {
        let entries = self.fast.hash_get_all(&keys::scores(session_id)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(field, raw)| {
                let participant_id = Uuid::parse_str(&field).ok()?;
                match serde_json::from_str(&raw) {
                    Ok(score) => Some((participant_id, score)),
                    Err(err) => {
                        warn!(%session_id, %participant_id, error = %err, "skipping malformed score");
                        None
                    }
                }
            })
            .collect())
    }
}
