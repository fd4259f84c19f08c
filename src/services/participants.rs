use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{
        fast_store::FastStore,
        keys,
        models::{ParticipantEntity, ParticipantStatus},
    },
    error::ServiceError,
};

/// Participant-session records held in the fast store.
pub struct ParticipantDirectory {
    fast: Arc<dyn FastStore>,
}

impl ParticipantDirectory {
    /// Build a directory over the given fast store.
    pub fn new(fast: Arc<dyn FastStore>) -> Self {
        Self { fast }
    }

    /// Store (or overwrite) a participant record.
    pub async fn put(&self, session_id: Uuid, participant: &ParticipantEntity) -> Result<(), ServiceError> {
        self.fast
            .hash_set(
                &keys::participants(session_id),
                &participant.id.to_string(),
                serde_json::to_string(participant)?,
            )
            .await?;
        Ok(())
    }

    /// Look up a participant of a session.
    pub async fn get(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Option<ParticipantEntity>, ServiceError> {
        let raw = self
            .fast
            .hash_get(&keys::participants(session_id), &participant_id.to_string())
            .await?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    /// Every participant of a session, in join order.
    pub async fn list(&self, session_id: Uuid) -> Result<Vec<ParticipantEntity>, ServiceError> {
        let mut participants: Vec<ParticipantEntity> = self
            .fast
            .hash_get_all(&keys::participants(session_id))
            .await?
            .into_iter()
            .filter_map(|(field, raw)| match serde_json::from_str(&raw) {
                Ok(participant) => Some(participant),
                Err(err) => {
                    warn!(%session_id, participant = %field, error = %err, "skipping malformed participant");
                    None
                }
            })
            .collect();
        participants.sort_by_key(|participant| (participant.joined_at_ms, participant.id));
        Ok(participants)
    }

    /// Whether a nickname is already taken by a non-removed participant.
    pub async fn nickname_taken(&self, session_id: Uuid, nickname: &str) -> Result<bool, ServiceError> {
        let wanted = normalize(nickname);
        Ok(self.list(session_id).await?.iter().any(|participant| {
            normalize(&participant.nickname) == wanted
                && !matches!(
                    participant.status,
                    ParticipantStatus::Kicked | ParticipantStatus::Banned
                )
        }))
    }

    /// Change a participant's status; returns the updated record.
    pub async fn set_status(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        status: ParticipantStatus,
    ) -> Result<ParticipantEntity, ServiceError> {
        let mut participant = self
            .get(session_id, participant_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("participant {participant_id}")))?;
        let previous = std::mem::replace(&mut participant.status, status);
        self.put(session_id, &participant).await?;

        let banned_key = keys::banned_nicknames(session_id);
        let nickname = normalize(&participant.nickname);
        if status == ParticipantStatus::Banned {
            self.fast
                .hash_set(&banned_key, &nickname, participant_id.to_string())
                .await?;
        } else if previous == ParticipantStatus::Banned {
            self.fast.hash_delete(&banned_key, &nickname).await?;
        }
        Ok(participant)
    }

    /// Whether a nickname was banned from the session.
    pub async fn is_banned(&self, session_id: Uuid, nickname: &str) -> Result<bool, ServiceError> {
        Ok(self
            .fast
            .hash_get(&keys::banned_nicknames(session_id), &normalize(nickname))
            .await?
            .is_some())
    }
}

fn normalize(nickname: &str) -> String {
    nickname.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{fast_store::memory::MemoryFastStore, models::now_ms};

    fn participant(nickname: &str) -> ParticipantEntity {
        ParticipantEntity {
            id: Uuid::new_v4(),
            nickname: nickname.into(),
            status: ParticipantStatus::Active,
            joined_at_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn banning_blocks_the_nickname() {
        let directory = ParticipantDirectory::new(Arc::new(MemoryFastStore::new()));
        let session_id = Uuid::new_v4();
        let troll = participant("Troll");
        directory.put(session_id, &troll).await.unwrap();
        assert!(directory.nickname_taken(session_id, " troll ").await.unwrap());

        let banned = directory
            .set_status(session_id, troll.id, ParticipantStatus::Banned)
            .await
            .unwrap();
        assert_eq!(banned.status, ParticipantStatus::Banned);
        assert!(directory.is_banned(session_id, "TROLL").await.unwrap());
        assert!(!directory.nickname_taken(session_id, "troll").await.unwrap());

        directory
            .set_status(session_id, troll.id, ParticipantStatus::Active)
            .await
            .unwrap();
        assert!(!directory.is_banned(session_id, "troll").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_participant_status_change_is_not_found() {
        let directory = ParticipantDirectory::new(Arc::new(MemoryFastStore::new()));
        let err = directory
            .set_status(Uuid::new_v4(), Uuid::new_v4(), ParticipantStatus::Kicked)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
