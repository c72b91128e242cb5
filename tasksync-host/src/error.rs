//! Error types for the host.

use thiserror::Error;

/// Result type for host setup operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors raised while configuring a host. Request execution never
/// returns these; it reports failures per task.
#[derive(Debug, Error)]
pub enum HostError {
    /// A container with this name is already registered.
    #[error("container already registered: {0}")]
    ContainerExists(String),

    /// A message handler with this name is already registered.
    #[error("message handler already registered: {0}")]
    HandlerExists(String),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
