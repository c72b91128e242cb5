use crate::{ModelError, ModelResult, RefField};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A record stored in a named container, identified by a key.
///
/// Entities travel as JSON; the key is the string (or number) found under
/// [`Entity::KEY_FIELD`]. Reference fields are exposed through
/// [`Entity::visit_refs`] so that new entities embedded in a created
/// entity can be traced and created alongside it, and through
/// [`Entity::visit_refs_mut`] so that references of fetched entities can
/// be bound to the peer registry of their container.
pub trait Entity: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static {
    /// Name of the container holding entities of this type.
    const CONTAINER: &'static str;

    /// JSON member holding the key.
    const KEY_FIELD: &'static str = "id";

    /// The entity key, `None` while unset.
    fn key(&self) -> Option<&str>;

    /// Overwrites the key. Use [`assign_key`] to respect key immutability.
    fn set_key(&mut self, key: &str);

    /// Calls `visitor` once per `Ref` field.
    fn visit_refs<'a>(&'a self, _visitor: &mut dyn FnMut(&'a dyn RefField)) {}

    /// Calls `visitor` once per `Ref` field, mutably.
    fn visit_refs_mut(&mut self, _visitor: &mut dyn FnMut(&mut dyn RefField)) {}
}

/// Assigns `key` to `entity`.
///
/// Assigning the key an entity already has is a no-op; assigning a
/// different one is a [`ModelError::KeyConflict`].
pub fn assign_key<T: Entity>(entity: &mut T, key: &str) -> ModelResult<()> {
    match entity.key() {
        Some(existing) if existing != key => Err(ModelError::KeyConflict {
            container: T::CONTAINER.to_string(),
            existing: existing.to_string(),
            key: key.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            entity.set_key(key);
            Ok(())
        }
    }
}

/// Serializes an entity into its JSON form (also used as a deep copy).
pub fn to_value<T: Entity>(entity: &T) -> ModelResult<Value> {
    Ok(serde_json::to_value(entity)?)
}

/// Deserializes an entity from its JSON form.
pub fn from_value<T: Entity>(value: Value) -> ModelResult<T> {
    Ok(serde_json::from_value(value)?)
}

/// Extracts the key of a JSON entity. Numeric keys are rendered as strings.
pub fn key_of_value(value: &Value, key_field: &str) -> Option<String> {
    match value.get(key_field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
