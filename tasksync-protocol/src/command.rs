//! Client → host messages.

use crate::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tasksync_model::{Filter, MemberPatch};

/// A batch of commands sent in one round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Protocol version.
    pub version: u32,
    /// Sending client, if it identifies itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Authenticated user on whose behalf the batch runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Commands, executed in order.
    pub tasks: Vec<TaskCommand>,
}

impl SyncRequest {
    /// Creates a request for the current protocol version.
    pub fn new(tasks: Vec<TaskCommand>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            client_id: None,
            user_id: None,
            tasks,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// One operation against one container, or a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskCommand {
    /// Create entities; an existing key is an entity error.
    Create {
        container: String,
        entities: Vec<Value>,
    },
    /// Create or replace entities.
    Upsert {
        container: String,
        entities: Vec<Value>,
    },
    /// Read entities by key, resolving reference selectors on the results.
    Read {
        container: String,
        keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        references: Vec<ReferenceSelector>,
    },
    /// Query entities by filter, resolving reference selectors on the results.
    Query {
        container: String,
        filter: Filter,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        references: Vec<ReferenceSelector>,
    },
    /// Apply member patches to existing entities.
    Patch {
        container: String,
        patches: Vec<EntityPatch>,
    },
    /// Delete entities by key, or every entity of the container.
    Delete {
        container: String,
        target: DeleteTarget,
    },
    /// A named message handled by a host-side handler.
    Message {
        name: String,
        #[serde(default)]
        params: Value,
    },
}

impl TaskCommand {
    /// Addressed container, `None` for messages.
    pub fn container(&self) -> Option<&str> {
        match self {
            Self::Create { container, .. }
            | Self::Upsert { container, .. }
            | Self::Read { container, .. }
            | Self::Query { container, .. }
            | Self::Patch { container, .. }
            | Self::Delete { container, .. } => Some(container),
            Self::Message { .. } => None,
        }
    }

    /// Short operation name, used in logs and access rules.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Upsert { .. } => "upsert",
            Self::Read { .. } => "read",
            Self::Query { .. } => "query",
            Self::Patch { .. } => "patch",
            Self::Delete { .. } => "delete",
            Self::Message { .. } => "message",
        }
    }
    /// Whether the command changes stored entities.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Create { .. } | Self::Upsert { .. } | Self::Patch { .. } | Self::Delete { .. }
        )
    }
}

/// Member patches for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    pub key: String,
    pub members: Vec<MemberPatch>,
}

impl EntityPatch {
    pub fn new(key: impl Into<String>, members: Vec<MemberPatch>) -> Self {
        Self {
            key: key.into(),
            members,
        }
    }
}

/// What a delete command removes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteTarget {
    Keys(Vec<String>),
    All,
}

/// A reference path to resolve on the entities a read or query returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSelector {
    /// Member path, e.g. `producer` or `items[*].article`.
    pub selector: String,
    /// Container holding the referenced entities.
    pub container: String,
    /// Selectors to resolve on the referenced entities in turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceSelector>,
}

impl ReferenceSelector {
    pub fn new(selector: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            container: container.into(),
            references: Vec::new(),
        }
    }

    pub fn with_references(mut self, references: Vec<ReferenceSelector>) -> Self {
        self.references = references;
        self
    }
}
