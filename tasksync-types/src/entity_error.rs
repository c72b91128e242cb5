//! Entity-scoped errors: one failing key among many in a batch.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What went wrong with a single entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityErrorKind {
    /// The entity could not be read from its container.
    ReadError,
    /// The entity could not be written (create / upsert / delete).
    WriteError,
    /// The payload is not a valid entity (bad JSON, missing key).
    ParseError,
    /// A patch could not be applied, including a missing patch target.
    PatchError,
}

impl fmt::Display for EntityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadError => "ReadError",
            Self::WriteError => "WriteError",
            Self::ParseError => "ParseError",
            Self::PatchError => "PatchError",
        };
        f.write_str(name)
    }
}

/// An error scoped to one key of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityError {
    pub kind: EntityErrorKind,
    pub container: String,
    pub key: String,
    pub message: String,
}

impl EntityError {
    pub fn new(
        kind: EntityErrorKind,
        container: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            container: container.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn read(container: impl Into<String>, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EntityErrorKind::ReadError, container, key, message)
    }

    pub fn write(container: impl Into<String>, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EntityErrorKind::WriteError, container, key, message)
    }

    pub fn parse(container: impl Into<String>, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EntityErrorKind::ParseError, container, key, message)
    }

    pub fn patch(container: impl Into<String>, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EntityErrorKind::PatchError, container, key, message)
    }
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [{}], {}", self.kind, self.container, self.key, self.message)
    }
}

impl std::error::Error for EntityError {}
