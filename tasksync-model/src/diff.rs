//! Structural diff between two JSON values.
//!
//! Produces one [`MemberPatch`] per changed leaf, addressed by JSON
//! pointer. Objects are diffed member by member; arrays of equal length
//! element by element; arrays whose length changed are replaced whole.

use crate::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single change to apply to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MemberPatch {
    /// Set the member at `path` to `value`.
    Replace { path: String, value: Value },
    /// Remove the member at `path`.
    Remove { path: String },
}

impl MemberPatch {
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self::Replace {
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// Computes the patches turning `old` into `new`.
pub fn diff_values(old: &Value, new: &Value) -> Vec<MemberPatch> {
    let mut patches = Vec::new();
    diff_into(old, new, &mut String::new(), &mut patches);
    patches
}

fn diff_into(old: &Value, new: &Value, path: &mut String, out: &mut Vec<MemberPatch>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (member, old_value) in old_map {
                let len = path.len();
                push_token(path, member);
                match new_map.get(member) {
                    Some(new_value) => diff_into(old_value, new_value, path, out),
                    None => out.push(MemberPatch::remove(path.as_str())),
                }
                path.truncate(len);
            }
            for (member, new_value) in new_map {
                if !old_map.contains_key(member) {
                    let len = path.len();
                    push_token(path, member);
                    out.push(MemberPatch::replace(path.as_str(), new_value.clone()));
                    path.truncate(len);
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) if old_items.len() == new_items.len() => {
            for (index, (old_item, new_item)) in old_items.iter().zip(new_items).enumerate() {
                let len = path.len();
                push_token(path, &index.to_string());
                diff_into(old_item, new_item, path, out);
                path.truncate(len);
            }
        }
        _ => {
            if old != new {
                out.push(MemberPatch::replace(path.as_str(), new.clone()));
            }
        }
    }
}

fn push_token(path: &mut String, token: &str) {
    path.push('/');
    for c in token.chars() {
        match c {
            '~' => path.push_str("~0"),
            '/' => path.push_str("~1"),
            _ => path.push(c),
        }
    }
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Applies `patches` to `target` in order.
pub fn apply_patches(target: &mut Value, patches: &[MemberPatch]) -> ModelResult<()> {
    for patch in patches {
        apply_patch(target, patch)?;
    }
    Ok(())
}

fn apply_patch(target: &mut Value, patch: &MemberPatch) -> ModelResult<()> {
    let path = patch.path();
    if path.is_empty() {
        return match patch {
            MemberPatch::Replace { value, .. } => {
                *target = value.clone();
                Ok(())
            }
            MemberPatch::Remove { .. } => Err(path_error(path, "cannot remove the root")),
        };
    }
    let split = path
        .rfind('/')
        .ok_or_else(|| path_error(path, "path must start with '/'"))?;
    let (parent_path, token) = (&path[..split], unescape_token(&path[split + 1..]));
    let parent = target
        .pointer_mut(parent_path)
        .ok_or_else(|| path_error(path, "parent not found"))?;

    match (parent, patch) {
        (Value::Object(map), MemberPatch::Replace { value, .. }) => {
            map.insert(token, value.clone());
        }
        (Value::Object(map), MemberPatch::Remove { .. }) => {
            if map.remove(&token).is_none() {
                return Err(path_error(path, "member not found"));
            }
        }
        (Value::Array(items), _) => {
            let index: usize = token
                .parse()
                .map_err(|_| path_error(path, "invalid array index"))?;
            match patch {
                MemberPatch::Replace { value, .. } if index < items.len() => {
                    items[index] = value.clone();
                }
                MemberPatch::Replace { value, .. } if index == items.len() => {
                    items.push(value.clone());
                }
                MemberPatch::Remove { .. } if index < items.len() => {
                    items.remove(index);
                }
                _ => return Err(path_error(path, "array index out of bounds")),
            }
        }
        _ => return Err(path_error(path, "parent is not an object or array")),
    }
    Ok(())
}

fn path_error(path: &str, reason: &str) -> ModelError {
    ModelError::PatchPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
