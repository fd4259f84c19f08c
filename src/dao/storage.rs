use std::{error::Error, io};

use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Message fragments that identify a connectivity failure when the backend
/// does not expose a structured error kind.
const UNAVAILABILITY_MARKERS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "connection closed",
    "broken pipe",
    "unreachable",
    "econnrefused",
    "econnreset",
    "etimedout",
    "ehostunreach",
    "enetunreach",
    "server selection",
    "no servers available",
];

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached (connection, timeout, selection).
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend rejected the operation itself (validation, duplicate key).
    #[error("storage rejected operation: {message}")]
    Data { message: String },
    /// A value could not be encoded or decoded.
    #[error("storage payload could not be (de)serialized")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a data error; never triggers the fallback path.
    pub fn data(message: impl Into<String>) -> Self {
        StorageError::Data {
            message: message.into(),
        }
    }

    /// Classify an arbitrary backend failure by its message and IO kind.
    pub fn classify(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        if is_unavailability_message(&message)
            || io_kind_in_chain(&source).is_some_and(is_unavailability_kind)
        {
            StorageError::unavailable(message, source)
        } else {
            StorageError::Data { message }
        }
    }

    /// Whether this failure means the backend is unreachable rather than
    /// rejecting the operation.
    pub fn is_unavailability(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}

/// Connection refused/reset/aborted, timeouts and unreachable hosts.
pub fn is_unavailability_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

/// Case-insensitive substring match against known connectivity markers.
pub fn is_unavailability_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    UNAVAILABILITY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

fn io_kind_in_chain(err: &(dyn Error + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}
