use crate::StorageResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tasksync_model::Filter;
use tasksync_protocol::{DeleteTarget, EntityPatch, EntityValue};
use tasksync_types::EntityError;

/// Per-key failures of a write; empty when every entity succeeded.
pub type EntityErrors = BTreeMap<String, EntityError>;

/// An entity payload together with the key extracted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedEntity {
    pub key: String,
    pub value: Value,
}

impl KeyedEntity {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A named container of entities, implemented by a storage adapter.
#[async_trait]
pub trait EntityContainer: Send + Sync {
    /// Container name addressed by commands.
    fn name(&self) -> &str;

    /// JSON member holding the entity key.
    fn key_field(&self) -> &str {
        "id"
    }

    /// Creates entities. An existing key is a `WriteError` for that key.
    async fn create_entities(&self, entities: Vec<KeyedEntity>) -> StorageResult<EntityErrors>;

    /// Creates or replaces entities.
    async fn upsert_entities(&self, entities: Vec<KeyedEntity>) -> StorageResult<EntityErrors>;

    /// Reads entities. Every requested key has an entry; missing keys map
    /// to [`EntityValue::missing`].
    async fn read_entities(&self, keys: &[String]) -> StorageResult<BTreeMap<String, EntityValue>>;

    /// Returns the entities matching `filter`, in key order.
    async fn query_entities(&self, filter: &Filter) -> StorageResult<Vec<KeyedEntity>>;

    /// Applies member patches. A missing target is a `PatchError`.
    async fn patch_entities(&self, patches: &[EntityPatch]) -> StorageResult<EntityErrors>;

    /// Deletes entities. Deleting a missing key is not an error.
    async fn delete_entities(&self, target: &DeleteTarget) -> StorageResult<EntityErrors>;
}
