use serde_json::Value;
use std::collections::BTreeMap;
use tasksync_protocol::{ContainerEntities, EntityValue, SyncRequest, SyncResponse, TaskResult};

/// Per-request state: caller identity and the entity results accumulated
/// while the request's tasks execute.
///
/// Created when a request enters the executor and consumed into its
/// response; nothing in it outlives the request.
#[derive(Debug, Default)]
pub struct SyncContext {
    client_id: Option<String>,
    user_id: Option<String>,
    containers: BTreeMap<String, ContainerEntities>,
}

impl SyncContext {
    pub fn new(client_id: Option<String>, user_id: Option<String>) -> Self {
        Self {
            client_id,
            user_id,
            containers: BTreeMap::new(),
        }
    }

    pub(crate) fn for_request(request: &SyncRequest) -> Self {
        Self::new(request.client_id.clone(), request.user_id.clone())
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Merges entity results of `container`. A later result for a key
    /// replaces an earlier one.
    pub(crate) fn add_entities(&mut self, container: &str, values: BTreeMap<String, EntityValue>) {
        self.containers
            .entry(container.to_string())
            .or_default()
            .entities
            .extend(values);
    }

    /// An entity value already read during this request.
    pub(crate) fn cached_value(&self, container: &str, key: &str) -> Option<&Value> {
        self.containers
            .get(container)?
            .entities
            .get(key)?
            .value
            .as_ref()
    }

    /// Keys of `container` among `keys` that this request already read.
    pub(crate) fn cached_keys<'a>(
        &self,
        container: &str,
        keys: impl IntoIterator<Item = &'a String>,
    ) -> Vec<String> {
        let Some(cached) = self.containers.get(container) else {
            return Vec::new();
        };
        keys.into_iter()
            .filter(|key| cached.entities.contains_key(*key))
            .cloned()
            .collect()
    }

    /// Every key of `container` this request already read.
    pub(crate) fn all_cached_keys(&self, container: &str) -> Vec<String> {
        self.containers
            .get(container)
            .map(|cached| cached.entities.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn into_response(self, tasks: Vec<TaskResult>) -> SyncResponse {
        SyncResponse {
            tasks,
            containers: self.containers,
        }
    }
}
