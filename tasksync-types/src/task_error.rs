//! Task-scoped errors.
//!
//! A task fails either because some of its entities failed
//! ([`TaskErrorKind::EntityErrors`], with the per-key map populated) or
//! because of a condition with no single responsible entity.

use crate::EntityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskErrorKind {
    /// One or more entities of the task failed; see `entity_errors`.
    EntityErrors,
    /// The container adapter reported a storage failure.
    DatabaseError,
    /// A panic or handler failure escaped task execution on the host.
    UnhandledException,
    /// The access policy rejected the task.
    PermissionDenied,
    /// The task command itself is malformed or addresses nothing.
    InvalidTask,
    /// The client could not apply the host's answer to the task.
    InvalidOperation,
    /// The round trip failed: transport error, timeout or cancellation.
    SyncError,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EntityErrors => "EntityErrors",
            Self::DatabaseError => "DatabaseError",
            Self::UnhandledException => "UnhandledException",
            Self::PermissionDenied => "PermissionDenied",
            Self::InvalidTask => "InvalidTask",
            Self::InvalidOperation => "InvalidOperation",
            Self::SyncError => "SyncError",
        };
        f.write_str(name)
    }
}

/// The error a failed task carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entity_errors: BTreeMap<String, EntityError>,
}

impl TaskError {
    /// Creates a task-scoped error with a message.
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            entity_errors: BTreeMap::new(),
        }
    }

    /// Creates an `EntityErrors` error from a per-key map.
    pub fn from_entity_errors(errors: BTreeMap<String, EntityError>) -> Self {
        Self {
            kind: TaskErrorKind::EntityErrors,
            message: format!("count: {}", errors.len()),
            entity_errors: errors,
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::DatabaseError, message)
    }

    pub fn unhandled(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::UnhandledException, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::PermissionDenied, message)
    }

    pub fn invalid_task(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::InvalidTask, message)
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::InvalidOperation, message)
    }

    pub fn sync_error(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::SyncError, message)
    }

    /// Number of failed entities (zero for task-scoped errors).
    pub fn entity_error_count(&self) -> usize {
        self.entity_errors.len()
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.kind, self.message)?;
        for error in self.entity_errors.values() {
            write!(f, "\n|   {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskError {}
