//! In-memory container.

use crate::{EntityContainer, EntityErrors, KeyedEntity, StorageResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tasksync_model::{apply_patches, key_of_value, Filter};
use tasksync_protocol::{DeleteTarget, EntityPatch, EntityValue};
use tasksync_types::EntityError;
use tokio::sync::RwLock;
use tracing::debug;

/// A container holding entities in a `BTreeMap` behind an async `RwLock`.
pub struct MemoryContainer {
    name: String,
    key_field: String,
    entities: RwLock<BTreeMap<String, Value>>,
}

impl MemoryContainer {
    /// Creates an empty container whose key member is `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: "id".to_string(),
            entities: RwLock::new(BTreeMap::new()),
        }
    }

    /// Sets the JSON member holding the key.
    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }

    /// Creates a container pre-filled with `entities`. Entities without a
    /// key are skipped.
    pub fn with_entities(name: impl Into<String>, entities: Vec<Value>) -> Self {
        let container = Self::new(name);
        let mut map = BTreeMap::new();
        for value in entities {
            if let Some(key) = key_of_value(&value, &container.key_field) {
                map.insert(key, value);
            }
        }
        Self {
            entities: RwLock::new(map),
            ..container
        }
    }

    /// Returns a copy of one stored entity.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entities.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[async_trait]
impl EntityContainer for MemoryContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_field(&self) -> &str {
        &self.key_field
    }

    async fn create_entities(&self, entities: Vec<KeyedEntity>) -> StorageResult<EntityErrors> {
        let mut store = self.entities.write().await;
        let mut errors = EntityErrors::new();
        for entity in entities {
            if store.contains_key(&entity.key) {
                errors.insert(
                    entity.key.clone(),
                    EntityError::write(&self.name, &entity.key, "entity already exists"),
                );
                continue;
            }
            store.insert(entity.key, entity.value);
        }
        debug!("{}: create, {} failed", self.name, errors.len());
        Ok(errors)
    }

    async fn upsert_entities(&self, entities: Vec<KeyedEntity>) -> StorageResult<EntityErrors> {
        let mut store = self.entities.write().await;
        for entity in entities {
            store.insert(entity.key, entity.value);
        }
        Ok(EntityErrors::new())
    }

    async fn read_entities(&self, keys: &[String]) -> StorageResult<BTreeMap<String, EntityValue>> {
        let store = self.entities.read().await;
        Ok(keys
            .iter()
            .map(|key| {
                let value = match store.get(key) {
                    Some(v) => EntityValue::found(v.clone()),
                    None => EntityValue::missing(),
                };
                (key.clone(), value)
            })
            .collect())
    }

    async fn query_entities(&self, filter: &Filter) -> StorageResult<Vec<KeyedEntity>> {
        let store = self.entities.read().await;
        Ok(store
            .iter()
            .filter(|(_, value)| filter.matches(value))
            .map(|(key, value)| KeyedEntity::new(key.clone(), value.clone()))
            .collect())
    }

    async fn patch_entities(&self, patches: &[EntityPatch]) -> StorageResult<EntityErrors> {
        let mut store = self.entities.write().await;
        let mut errors = EntityErrors::new();
        for patch in patches {
            let Some(current) = store.get(&patch.key) else {
                errors.insert(
                    patch.key.clone(),
                    EntityError::patch(&self.name, &patch.key, "patch target not found"),
                );
                continue;
            };
            let mut patched = current.clone();
            if let Err(e) = apply_patches(&mut patched, &patch.members) {
                errors.insert(
                    patch.key.clone(),
                    EntityError::patch(&self.name, &patch.key, e.to_string()),
                );
                continue;
            }
            if key_of_value(&patched, &self.key_field).as_deref() != Some(patch.key.as_str()) {
                errors.insert(
                    patch.key.clone(),
                    EntityError::patch(&self.name, &patch.key, "patch must not change the key"),
                );
                continue;
            }
            store.insert(patch.key.clone(), patched);
        }
        Ok(errors)
    }

    async fn delete_entities(&self, target: &DeleteTarget) -> StorageResult<EntityErrors> {
        let mut store = self.entities.write().await;
        match target {
            DeleteTarget::Keys(keys) => {
                for key in keys {
                    store.remove(key);
                }
            }
            DeleteTarget::All => store.clear(),
        }
        Ok(EntityErrors::new())
    }
}
