//! Core type definitions for tasksync.
//!
//! This crate defines the types shared by the client task graph and the
//! host executor:
//! - Task and client identifiers
//! - The entity-scoped error taxonomy ([`EntityError`])
//! - The task-scoped error taxonomy ([`TaskError`])
//!
//! Both sides of the wire depend on these so that an error produced by a
//! container adapter on the host reads the same when it surfaces on a
//! client task handle.

mod entity_error;
mod ids;
mod task_error;

pub use entity_error::{EntityError, EntityErrorKind};
pub use ids::{ClientId, TaskId};
pub use task_error::{TaskError, TaskErrorKind};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid task id: {0}")]
    InvalidTaskId(String),
}
