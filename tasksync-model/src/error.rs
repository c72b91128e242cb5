//! Error types for the model layer.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by entity, reference, diff and selector operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// An already-keyed entity was given a different key.
    #[error("key conflict in {container}: entity has key '{existing}', cannot assign '{key}'")]
    KeyConflict {
        container: String,
        existing: String,
        key: String,
    },

    /// The entity has no key where one is required.
    #[error("entity in {container} has no key")]
    MissingKey { container: String },

    /// A container-bound reference was dereferenced before its peer was assigned.
    #[error("unresolved reference {container} [{key}]")]
    UnresolvedReference { container: String, key: String },

    /// A reference selector could not be parsed.
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// A member patch addresses a path that does not exist.
    #[error("invalid patch path '{path}': {reason}")]
    PatchPath { path: String, reason: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
