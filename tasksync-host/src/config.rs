use crate::HostResult;
use serde::{Deserialize, Serialize};
use tasksync_protocol::MAX_TASKS_PER_REQUEST;

/// Configuration for the task executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Name of the database the hub serves.
    #[serde(default = "default_database_name")]
    pub database_name: String,
    /// Requests with more tasks are rejected task by task.
    #[serde(default = "default_max_tasks")]
    pub max_tasks_per_request: usize,
    /// Convert panics escaping a task into `UnhandledException` results.
    #[serde(default = "default_catch_panics")]
    pub catch_panics: bool,
}

fn default_database_name() -> String {
    "main".to_string()
}

fn default_max_tasks() -> usize {
    MAX_TASKS_PER_REQUEST
}

fn default_catch_panics() -> bool {
    true
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            database_name: default_database_name(),
            max_tasks_per_request: default_max_tasks(),
            catch_panics: default_catch_panics(),
        }
    }
}

impl HostConfig {
    /// Parses a configuration from JSON; absent fields take their defaults.
    pub fn from_json(json: &str) -> HostResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
