//! Error types for the client.

use tasksync_model::ModelError;
use tasksync_types::TaskError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised while building the task graph.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Entity model error (missing key, key conflict, serialization).
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The entity is not tracked by its entity set.
    #[error("{container} [{key}] is not tracked")]
    NotTracked { container: String, key: String },

    /// A different entity with the same key is already tracked.
    #[error("another entity with key '{key}' is already tracked in {container}")]
    KeyConflict { container: String, key: String },

    /// The container is registered with another entity type.
    #[error("container '{container}' is registered with a different entity type")]
    ContainerType { container: String },
}

/// Errors raised when reading a task handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskAccessError {
    /// The task has not been synced yet.
    #[error("Task not synced: {label}")]
    NotSynced { label: String },

    /// The task was synced and failed.
    #[error("Task failed: {label} # {error}")]
    Failed { label: String, error: TaskError },

    /// A sub-task was requested on a task already emitted or synced.
    #[error("Task already synced: {label}")]
    AlreadySynced { label: String },

    /// The reference selector is malformed or its cardinality does not
    /// match the accessor.
    #[error("invalid selector on {label}: {reason}")]
    InvalidSelector { label: String, reason: String },
}

impl TaskAccessError {
    /// The task error of a failed task.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Errors raised by a [`crate::SyncTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host could not be reached.
    #[error("host unavailable: {0}")]
    Unavailable(String),

    /// The host answered with something that is not a sync response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
