//! Host → client messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tasksync_types::{EntityError, TaskError, TaskErrorKind};

/// The answer to a [`crate::SyncRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// `tasks[i]` answers `request.tasks[i]`.
    pub tasks: Vec<TaskResult>,
    /// Entities read, queried or resolved, grouped by container.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, ContainerEntities>,
}

impl SyncResponse {
    /// Returns the entity results of `container`, creating them if absent.
    pub fn container_mut(&mut self, container: &str) -> &mut ContainerEntities {
        self.containers.entry(container.to_string()).or_default()
    }

    /// Looks up one entity result.
    pub fn entity(&self, container: &str, key: &str) -> Option<&EntityValue> {
        self.containers.get(container)?.entities.get(key)
    }

    /// Checks the result-count invariant against the request it answers.
    pub fn check_task_count(&self, request: &crate::SyncRequest) -> Result<(), String> {
        if self.tasks.len() == request.tasks.len() {
            Ok(())
        } else {
            Err(format!(
                "expected {} task results, got {}",
                request.tasks.len(),
                self.tasks.len()
            ))
        }
    }
}

/// Entities of one container, by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerEntities {
    pub entities: BTreeMap<String, EntityValue>,
}

/// A read outcome for one key: value, error, or missing (neither).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EntityError>,
}

impl EntityValue {
    pub fn found(value: Value) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }

    pub fn failed(error: EntityError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none() && self.error.is_none()
    }
}

/// The outcome of one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskResult {
    Create(WriteResult),
    Upsert(WriteResult),
    Patch(WriteResult),
    Delete(WriteResult),
    Read(ReadResult),
    Query(QueryResult),
    Message(MessageResult),
    /// The command failed as a whole.
    Error(TaskErrorResult),
}

impl TaskResult {
    pub fn error(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self::Error(TaskErrorResult {
            kind,
            message: message.into(),
        })
    }

    /// The task-level failure this result represents, if any.
    ///
    /// A write result with entity errors maps to an `EntityErrors` task error.
    pub fn task_error(&self) -> Option<TaskError> {
        match self {
            Self::Error(e) => Some(TaskError::new(e.kind, e.message.clone())),
            Self::Create(w) | Self::Upsert(w) | Self::Patch(w) | Self::Delete(w)
                if !w.errors.is_empty() =>
            {
                Some(TaskError::from_entity_errors(w.errors.clone()))
            }
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.task_error().is_none()
    }
}

/// Result of a create, upsert, patch or delete: the keys that failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, EntityError>,
}

impl WriteResult {
    pub fn with_errors(errors: BTreeMap<String, EntityError>) -> Self {
        Self { errors }
    }
}

/// Result of a read; the entities themselves are in `SyncResponse::containers`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferencesResult>,
}

/// Result of a query: matching keys in container order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferencesResult>,
}

/// Result of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResult {
    #[serde(default)]
    pub value: Value,
}

/// A task-level error on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskErrorResult {
    pub kind: TaskErrorKind,
    pub message: String,
}

/// Resolved keys for one reference selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferencesResult {
    pub selector: String,
    pub container: String,
    /// Parent key → referenced keys, in selector order.
    #[serde(default)]
    pub parents: BTreeMap<String, Vec<String>>,
    /// Set when the selector could not be resolved at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferencesResult>,
}

impl ReferencesResult {
    pub fn new(selector: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            container: container.into(),
            ..Default::default()
        }
    }

    /// Every referenced key across all parents, first occurrence wins.
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in self.parents.values().flatten() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}
