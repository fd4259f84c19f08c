use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{
    Collection, Database,
    bson::{self, Bson, Document, doc},
    options::IndexOptions,
};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
};
use crate::dao::{
    durable_store::DurableStore,
    models::{ANSWERS_COLLECTION, SESSIONS_COLLECTION, WriteOperation},
    storage::StorageResult,
};

/// MongoDB implementation of the durable store.
#[derive(Clone)]
pub struct MongoDurableStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

fn to_document(collection: &str, value: &Value) -> MongoResult<Document> {
    let mut document =
        bson::serialize_to_document(value).map_err(|err| MongoDaoError::Conversion {
            collection: collection.to_owned(),
            message: err.to_string(),
        })?;
    let id = document
        .get("id")
        .or_else(|| document.get("answer_id"))
        .cloned();
    if let Some(id) = id {
        document.insert("_id", id);
    }
    Ok(document)
}

fn from_document(collection: &str, mut document: Document) -> MongoResult<Value> {
    document.remove("_id");
    bson::deserialize_from_document(document).map_err(|err| MongoDaoError::Conversion {
        collection: collection.to_owned(),
        message: err.to_string(),
    })
}

impl MongoDurableStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let answers = self.collection(ANSWERS_COLLECTION).await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"session_id": 1, "question_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("answer_session_question_idx".to_owned()))
                    .build(),
            )
            .build();
        answers
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ANSWERS_COLLECTION,
                index: "session_id,question_id",
                source,
            })?;

        let sessions = self.collection(SESSIONS_COLLECTION).await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"join_code": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_join_code_idx".to_owned()))
                    .build(),
            )
            .build();
        sessions
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSIONS_COLLECTION,
                index: "join_code",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self, name: &str) -> Collection<Document> {
        self.inner.database.read().await.collection::<Document>(name)
    }

    async fn execute(&self, operation: WriteOperation) -> MongoResult<()> {
        let collection_name = operation.collection().to_owned();
        let operation_name = operation.name();
        let collection = self.collection(&collection_name).await;
        let write_error = |source| MongoDaoError::Write {
            collection: collection_name.clone(),
            operation: operation_name,
            source,
        };

        match operation {
            WriteOperation::InsertOne { document, .. } => {
                let document = to_document(&collection_name, &document)?;
                collection.insert_one(document).await.map_err(write_error)?;
            }
            WriteOperation::InsertMany { documents, .. } => {
                if documents.is_empty() {
                    return Ok(());
                }
                let documents = documents
                    .iter()
                    .map(|document| to_document(&collection_name, document))
                    .collect::<MongoResult<Vec<_>>>()?;
                collection
                    .insert_many(documents)
                    .ordered(false)
                    .await
                    .map_err(write_error)?;
            }
            WriteOperation::ReplaceOne { id, document, .. } => {
                let document = to_document(&collection_name, &document)?;
                collection
                    .replace_one(doc! {"_id": Bson::String(id)}, document)
                    .upsert(true)
                    .await
                    .map_err(write_error)?;
            }
            WriteOperation::UpdateOne { filter, set, .. } => {
                let filter = to_document(&collection_name, &filter)?;
                let set = to_document(&collection_name, &set)?;
                collection
                    .update_one(filter, doc! {"$set": set})
                    .await
                    .map_err(write_error)?;
            }
        }

        Ok(())
    }

    async fn find_document(&self, collection_name: &str, id: &str) -> MongoResult<Option<Value>> {
        let collection = self.collection(collection_name).await;
        let found = collection
            .find_one(doc! {"_id": id})
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: collection_name.to_owned(),
                id: id.to_owned(),
                source,
            })?;

        found
            .map(|document| from_document(collection_name, document))
            .transpose()
    }
}

impl DurableStore for MongoDurableStore {
    fn execute(&self, operation: WriteOperation) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.execute(operation).await.map_err(Into::into) })
    }

    fn find_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        let (collection, id) = (collection.to_owned(), id.to_owned());
        Box::pin(async move {
            store
                .find_document(&collection, &id)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
