use mongodb::error::{Error as MongoError, ErrorKind};
use thiserror::Error;

use crate::dao::storage::{StorageError, is_unavailability_kind, is_unavailability_message};

/// Result of a MongoDB backend call.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures specific to the MongoDB backend.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("`{operation}` on collection `{collection}` failed: {source}")]
    Write {
        collection: String,
        operation: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to load `{id}` from collection `{collection}`: {source}")]
    Load {
        collection: String,
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("document for collection `{collection}` could not be converted: {message}")]
    Conversion { collection: String, message: String },
}

impl MongoDaoError {
    fn driver_error(&self) -> Option<&MongoError> {
        match self {
            MongoDaoError::InvalidUri { source, .. }
            | MongoDaoError::ClientConstruction { source }
            | MongoDaoError::InitialPing { source, .. }
            | MongoDaoError::HealthPing { source }
            | MongoDaoError::EnsureIndex { source, .. }
            | MongoDaoError::Write { source, .. }
            | MongoDaoError::Load { source, .. } => Some(source),
            MongoDaoError::Conversion { .. } => None,
        }
    }
}

/// Network, server-selection and pool errors mean the server is unreachable.
fn is_unavailability(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Io(io_err) => is_unavailability_kind(io_err.kind()),
        ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => true,
        _ => is_unavailability_message(&err.to_string()),
    }
}

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        let unavailable = match &err {
            MongoDaoError::InitialPing { .. } | MongoDaoError::HealthPing { .. } => true,
            other => other.driver_error().is_some_and(is_unavailability),
        };
        if unavailable {
            StorageError::unavailable(err.to_string(), err)
        } else {
            StorageError::data(err.to_string())
        }
    }
}
