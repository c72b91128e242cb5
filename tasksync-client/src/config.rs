use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::SyncClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client id sent with each request. A UUID v7 is generated when unset.
    #[serde(default)]
    pub client_id: Option<String>,
    /// User on whose behalf requests are sent.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Timeout for one sync round trip in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            user_id: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}
