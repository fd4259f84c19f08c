use std::{path::Path, sync::Arc};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{QUIZZES_COLLECTION, QuizEntity, WriteOperation},
    error::ServiceError,
    services::fallback_guard::FallbackGuard,
    state::quiz::{Quiz, QuizCatalog},
};

/// Quiz catalog backed by the `quizzes` collection, with an in-process
/// cache of decoded quizzes.
#[derive(Clone)]
pub struct DurableQuizCatalog {
    guard: Arc<FallbackGuard>,
    cache: Arc<DashMap<Uuid, Arc<Quiz>>>,
}

impl DurableQuizCatalog {
    /// Build a catalog reading through the fallback guard.
    pub fn new(guard: Arc<FallbackGuard>) -> Self {
        Self {
            guard,
            cache: Arc::new(DashMap::new()),
        }
    }
}

impl QuizCatalog for DurableQuizCatalog {
    fn get_quiz(&self, id: Uuid) -> BoxFuture<'static, Result<Option<Arc<Quiz>>, ServiceError>> {
        let catalog = self.clone();
        Box::pin(async move {
            if let Some(quiz) = catalog.cache.get(&id) {
                return Ok(Some(quiz.value().clone()));
            }

            let Some(document) = catalog
                .guard
                .find_document(QUIZZES_COLLECTION, &id.to_string())
                .await?
            else {
                return Ok(None);
            };
            let entity: QuizEntity = serde_json::from_value(document)?;
            let quiz = Arc::new(Quiz::from(entity));
            catalog.cache.insert(id, quiz.clone());
            debug!(quiz_id = %id, "quiz loaded into catalog cache");
            Ok(Some(quiz))
        })
    }

    fn upsert_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, Result<(), ServiceError>> {
        let catalog = self.clone();
        Box::pin(async move {
            let id = quiz.id;
            catalog
                .guard
                .execute(WriteOperation::ReplaceOne {
                    collection: QUIZZES_COLLECTION.to_owned(),
                    id: id.to_string(),
                    document: serde_json::to_value(&quiz)?,
                })
                .await?;
            catalog.cache.insert(id, Arc::new(Quiz::from(quiz)));
            Ok(())
        })
    }
}

/// Upsert every quiz listed in a JSON seed file. Returns how many were stored.
pub async fn seed_from_file(catalog: &dyn QuizCatalog, path: &Path) -> Result<usize, ServiceError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
        ServiceError::InvalidInput(format!("cannot read quiz seed {}: {err}", path.display()))
    })?;
    let quizzes: Vec<QuizEntity> = serde_json::from_str(&raw)
        .map_err(|err| ServiceError::InvalidInput(format!("invalid quiz seed {}: {err}", path.display())))?;

    let mut stored = 0;
    for quiz in quizzes {
        let quiz_id = quiz.id;
        match catalog.upsert_quiz(quiz).await {
            Ok(()) => stored += 1,
            Err(err) => warn!(%quiz_id, error = %err, "failed to seed quiz"),
        }
    }
    info!(count = stored, path = %path.display(), "quiz seed applied");
    Ok(stored)
}
