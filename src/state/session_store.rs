use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        fast_store::FastStore,
        keys,
        models::{SESSIONS_COLLECTION, SessionEntity, WriteOperation, now_ms},
    },
    error::ServiceError,
    services::fallback_guard::{FallbackGuard, WriteOutcome},
    state::state_machine::{SessionEvent, SessionPhase},
};

/// Authoritative session lifecycle records. The fast store serves live
/// reads; every write is mirrored to the durable store through the guard.
pub struct SessionStore {
    fast: Arc<dyn FastStore>,
    guard: Arc<FallbackGuard>,
    gates: DashMap<Uuid, Arc<Mutex<()>>>,
    transition_timeout: Duration,
}

impl SessionStore {
    /// Build a store over the given fast store and fallback guard.
    pub fn new(
        fast: Arc<dyn FastStore>,
        guard: Arc<FallbackGuard>,
        transition_timeout: Duration,
    ) -> Self {
        Self {
            fast,
            guard,
            gates: DashMap::new(),
            transition_timeout,
        }
    }

    /// Persist a new session and its join code.
    pub async fn create(&self, session: SessionEntity) -> Result<SessionEntity, ServiceError> {
        let code_key = keys::join_code(&session.join_code);
        if self.fast.get(&code_key).await?.is_some() {
            return Err(ServiceError::InvalidState(format!(
                "join code {} is already in use",
                session.join_code
            )));
        }

        self.fast
            .set(&code_key, session.id.to_string(), None)
            .await?;
        self.write(&session).await?;
        info!(session_id = %session.id, join_code = %session.join_code, "session created");
        Ok(session)
    }

    /// Current record: fast store first, then the durable store (or its
    /// fallback snapshot). A durable hit is written back to the fast store.
    pub async fn get(&self, session_id: Uuid) -> Result<Option<SessionEntity>, ServiceError> {
        if let Some(raw) = self.fast.get(&keys::session_state(session_id)).await? {
            return Ok(Some(serde_json::from_str(&raw)?));
        }

        let Some(document) = self
            .guard
            .find_document(SESSIONS_COLLECTION, &session_id.to_string())
            .await?
        else {
            return Ok(None);
        };

        let session: SessionEntity = serde_json::from_value(document)?;
        debug!(%session_id, "session restored from durable store");
        if let Err(err) = self
            .fast
            .set(
                &keys::session_state(session_id),
                serde_json::to_string(&session)?,
                None,
            )
            .await
        {
            warn!(%session_id, error = %err, "failed to re-warm session state");
        }
        Ok(Some(session))
    }

    /// Like [`SessionStore::get`] but a missing session is an error.
    pub async fn require(&self, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
        self.get(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id}")))
    }

    /// Resolve a join code to its session.
    pub async fn find_by_join_code(&self, code: &str) -> Result<Option<SessionEntity>, ServiceError> {
        let Some(raw_id) = self.fast.get(&keys::join_code(code)).await? else {
            return Ok(None);
        };
        let session_id = Uuid::parse_str(&raw_id)
            .map_err(|err| ServiceError::InvalidState(format!("corrupt join code mapping: {err}")))?;
        self.get(session_id).await
    }

    /// Apply a lifecycle event, then `mutate`, and write both stores.
    ///
    /// The current phase is re-read under a per-session gate, so concurrent
    /// transitions of one session are serialized while other sessions proceed.
    pub async fn transition<F>(
        &self,
        session_id: Uuid,
        event: SessionEvent,
        mutate: F,
    ) -> Result<SessionEntity, ServiceError>
    where
        F: FnOnce(&mut SessionEntity) -> Result<(), ServiceError>,
    {
        self.modify(session_id, Some(event), mutate).await
    }

    /// Mutate a session without changing its phase.
    pub async fn update<F>(&self, session_id: Uuid, mutate: F) -> Result<SessionEntity, ServiceError>
    where
        F: FnOnce(&mut SessionEntity) -> Result<(), ServiceError>,
    {
        self.modify(session_id, None, mutate).await
    }

    async fn modify<F>(
        &self,
        session_id: Uuid,
        event: Option<SessionEvent>,
        mutate: F,
    ) -> Result<SessionEntity, ServiceError>
    where
        F: FnOnce(&mut SessionEntity) -> Result<(), ServiceError>,
    {
        let gate = self
            .gates
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        let work = async {
            let mut session = self.require(session_id).await?;
            let from = session.state;
            if let Some(event) = event {
                session.state = session.state.apply(event)?;
            }
            mutate(&mut session)?;
            session.updated_at_ms = now_ms();
            self.write(&session).await?;
            if let Some(event) = event {
                info!(%session_id, ?event, ?from, to = ?session.state, "session transitioned");
            }
            Ok(session)
        };

        match timeout(self.transition_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%session_id, ?event, "session transition timed out");
                Err(ServiceError::Timeout)
            }
        }
    }

    /// Drop the per-session gate of a finished session.
    pub fn forget(&self, session_id: Uuid) {
        self.gates.remove(&session_id);
    }

    async fn write(&self, session: &SessionEntity) -> Result<WriteOutcome, ServiceError> {
        let encoded = serde_json::to_string(session)?;
        self.fast
            .set(&keys::session_state(session.id), encoded, None)
            .await?;

        self.guard
            .execute(WriteOperation::ReplaceOne {
                collection: SESSIONS_COLLECTION.to_owned(),
                id: session.id.to_string(),
                document: serde_json::to_value(session)?,
            })
            .await
    }
}

/// Reject joins the session phase does not allow.
pub fn ensure_joinable(session: &SessionEntity) -> Result<(), ServiceError> {
    if session.state.accepts_joins(session.allow_late_joiners) {
        return Ok(());
    }
    match session.state {
        SessionPhase::Ended => Err(ServiceError::InvalidState("session has ended".into())),
        _ => Err(ServiceError::InvalidState(
            "session already started and late joining is disabled".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::FallbackConfig,
        dao::{
            durable_store::{DurableStore, memory::MemoryDurableStore},
            fast_store::memory::MemoryFastStore,
            models::ExamMode,
        },
    };

    fn session(join_code: &str) -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            join_code: join_code.into(),
            state: SessionPhase::Lobby,
            current_question_index: None,
            current_question_id: None,
            participant_count: 0,
            allow_late_joiners: false,
            exam_mode: ExamMode::default(),
            created_at_ms: now_ms(),
            updated_at_ms: now_ms(),
        }
    }

    async fn store() -> (SessionStore, MemoryFastStore, MemoryDurableStore) {
        let fast = MemoryFastStore::new();
        let durable = MemoryDurableStore::new();
        let guard = Arc::new(FallbackGuard::new(
            Arc::new(fast.clone()),
            FallbackConfig::default(),
        ));
        guard.install_durable(Arc::new(durable.clone())).await;
        let store = SessionStore::new(Arc::new(fast.clone()), guard, Duration::from_secs(5));
        (store, fast, durable)
    }

    #[tokio::test]
    async fn create_writes_both_stores() {
        let (store, _, durable) = store().await;
        let created = store.create(session("ABC123")).await.unwrap();

        assert_eq!(durable.count(SESSIONS_COLLECTION), 1);
        let by_code = store.find_by_join_code("abc123").await.unwrap().unwrap();
        assert_eq!(by_code.id, created.id);
        assert!(store.create(session("ABC123")).await.is_err());
    }

    #[tokio::test]
    async fn get_falls_back_to_durable_copy() {
        let (store, fast, _) = store().await;
        let created = store.create(session("QWERTY")).await.unwrap();
        fast.delete(&keys::session_state(created.id)).await.unwrap();

        let restored = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(restored, created);
        assert!(fast.get(&keys::session_state(created.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transitions_follow_the_state_machine() {
        let (store, _, durable) = store().await;
        let created = store.create(session("ZXCVBN")).await.unwrap();

        let started = store
            .transition(created.id, SessionEvent::Start, |session| {
                session.current_question_index = Some(0);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(started.state, SessionPhase::ActiveQuestion);

        let again = store.transition(created.id, SessionEvent::Start, |_| Ok(())).await;
        assert!(matches!(again, Err(ServiceError::InvalidState(_))));

        store.transition(created.id, SessionEvent::End, |_| Ok(())).await.unwrap();
        let stored = durable
            .find_document(SESSIONS_COLLECTION, &created.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["state"], "ENDED");
        let ended = store.transition(created.id, SessionEvent::End, |_| Ok(())).await;
        assert!(ended.is_err());
    }

    #[tokio::test]
    async fn transitions_keep_working_during_durable_outage() {
        let (store, _, durable) = store().await;
        let created = store.create(session("OUTAGE")).await.unwrap();
        durable.simulate_outage(true);

        let started = store
            .transition(created.id, SessionEvent::Start, |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(started.state, SessionPhase::ActiveQuestion);
        assert_eq!(store.get(created.id).await.unwrap().unwrap().state, SessionPhase::ActiveQuestion);
    }

    #[test]
    fn join_guard() {
        let mut entity = session("JOINME");
        assert!(ensure_joinable(&entity).is_ok());
        entity.state = SessionPhase::Reveal;
        assert!(ensure_joinable(&entity).is_err());
        entity.allow_late_joiners = true;
        assert!(ensure_joinable(&entity).is_ok());
        entity.state = SessionPhase::Ended;
        assert!(ensure_joinable(&entity).is_err());
    }
}
