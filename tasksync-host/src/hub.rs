use crate::{HostError, HostResult};
use std::collections::HashMap;
use std::sync::Arc;
use tasksync_storage::EntityContainer;
use tokio::sync::RwLock;
use tracing::info;

/// Registry of the containers a host serves, by name.
pub struct DatabaseHub {
    name: String,
    containers: RwLock<HashMap<String, Arc<dyn EntityContainer>>>,
}

impl DatabaseHub {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            containers: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a container under its own name.
    pub async fn add_container(&self, container: Arc<dyn EntityContainer>) -> HostResult<()> {
        let name = container.name().to_string();
        let mut containers = self.containers.write().await;
        if containers.contains_key(&name) {
            return Err(HostError::ContainerExists(name));
        }
        info!("Database {}: registered container {}", self.name, name);
        containers.insert(name, container);
        Ok(())
    }

    pub async fn container(&self, name: &str) -> Option<Arc<dyn EntityContainer>> {
        self.containers.read().await.get(name).cloned()
    }

    /// Registered container names, sorted.
    pub async fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.containers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
