//! Typed references between entities.
//!
//! A [`Ref`] is always in exactly one of four states, encoded as enum
//! variants so the combinations that make no sense cannot be built.

use crate::{Entity, ModelError, ModelResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Access to the peer registry of the container owning a bound reference.
pub trait PeerHandle<T>: Send + Sync {
    /// Returns the live entity if the peer for `key` is assigned.
    fn assigned_entity(&self, key: &str) -> Option<T>;
}

/// A lazy reference to an entity of type `T`.
pub enum Ref<T> {
    /// No reference.
    Unset,
    /// Reference by key; the target has not been fetched.
    Key(String),
    /// The application assigned both key and instance.
    Value { key: String, entity: T },
    /// The owning container bound the key to its peer registry.
    Peer {
        key: String,
        handle: Arc<dyn PeerHandle<T>>,
    },
}

impl<T: Entity> Ref<T> {
    /// Creates a key-only reference.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }

    /// Creates a reference holding `entity`. The entity must have a key.
    pub fn from_entity(entity: T) -> ModelResult<Self> {
        let key = entity
            .key()
            .ok_or_else(|| ModelError::MissingKey {
                container: T::CONTAINER.to_string(),
            })?
            .to_string();
        Ok(Self::Value { key, entity })
    }

    /// Creates a reference bound to a container's peer registry.
    pub fn bound(key: impl Into<String>, handle: Arc<dyn PeerHandle<T>>) -> Self {
        Self::Peer {
            key: key.into(),
            handle,
        }
    }

    /// The referenced key, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Unset => None,
            Self::Key(key) | Self::Value { key, .. } | Self::Peer { key, .. } => Some(key),
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Dereferences the reference.
    ///
    /// Returns `Ok(None)` for unset and key-only references. A bound
    /// reference whose peer is not yet assigned is an error.
    pub fn get(&self) -> ModelResult<Option<T>> {
        match self {
            Self::Unset | Self::Key(_) => Ok(None),
            Self::Value { entity, .. } => Ok(Some(entity.clone())),
            Self::Peer { key, handle } => match handle.assigned_entity(key) {
                Some(entity) => Ok(Some(entity)),
                None => Err(ModelError::UnresolvedReference {
                    container: T::CONTAINER.to_string(),
                    key: key.clone(),
                }),
            },
        }
    }
}

impl<T> Default for Ref<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T: Clone> Clone for Ref<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Unset => Self::Unset,
            Self::Key(key) => Self::Key(key.clone()),
            Self::Value { key, entity } => Self::Value {
                key: key.clone(),
                entity: entity.clone(),
            },
            Self::Peer { key, handle } => Self::Peer {
                key: key.clone(),
                handle: Arc::clone(handle),
            },
        }
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("Ref::Unset"),
            Self::Key(key) => write!(f, "Ref::Key({key})"),
            Self::Value { key, .. } => write!(f, "Ref::Value({key})"),
            Self::Peer { key, .. } => write!(f, "Ref::Peer({key})"),
        }
    }
}

/// References compare by key.
impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        let key = |r: &Self| match r {
            Self::Unset => None,
            Self::Key(k) | Self::Value { key: k, .. } | Self::Peer { key: k, .. } => {
                Some(k.clone())
            }
        };
        key(self) == key(other)
    }
}

impl<T> Serialize for Ref<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unset => serializer.serialize_none(),
            Self::Key(key) | Self::Value { key, .. } | Self::Peer { key, .. } => {
                serializer.serialize_str(key)
            }
        }
    }
}

impl<'de, T> Deserialize<'de> for Ref<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = Option::<String>::deserialize(deserializer)?;
        Ok(match key {
            Some(key) => Self::Key(key),
            None => Self::Unset,
        })
    }
}

/// Type-erased view of a `Ref` field, handed out by [`Entity::visit_refs`].
pub trait RefField {
    /// Container of the referenced entity type.
    fn container(&self) -> &'static str;

    /// The referenced key, if any.
    fn ref_key(&self) -> Option<&str>;

    /// The JSON form of an application-assigned instance, if the
    /// reference holds one.
    fn embedded_value(&self) -> Option<ModelResult<Value>>;

    /// Binds a key-only reference to `handle`, which must be an
    /// `Arc<dyn PeerHandle<T>>` of the referenced type. Returns whether
    /// the reference was bound; other states are left alone.
    fn bind_peer(&mut self, handle: &(dyn Any + Send + Sync)) -> bool;
}

impl<T: Entity> RefField for Ref<T> {
    fn container(&self) -> &'static str {
        T::CONTAINER
    }

    fn ref_key(&self) -> Option<&str> {
        self.key()
    }

    fn embedded_value(&self) -> Option<ModelResult<Value>> {
        match self {
            Self::Value { entity, .. } => Some(crate::to_value(entity)),
            _ => None,
        }
    }

    fn bind_peer(&mut self, handle: &(dyn Any + Send + Sync)) -> bool {
        let Self::Key(key) = self else {
            return false;
        };
        let Some(handle) = handle.downcast_ref::<Arc<dyn PeerHandle<T>>>() else {
            return false;
        };
        *self = Self::bound(std::mem::take(key), Arc::clone(handle));
        true
    }
}
