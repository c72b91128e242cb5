//! Reference selectors.
//!
//! A selector is a member path from a parent entity to one or more
//! reference keys: `producer`, `.producer`, `items[*].article`,
//! `tags[*]`. A path containing `[*]` selects many references.

use crate::{ModelError, ModelResult};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Member(String),
    /// Every element of an array.
    Each,
}

/// A parsed reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    path: String,
    segments: Vec<Segment>,
}

impl Selector {
    /// Parses a selector path.
    pub fn parse(path: &str) -> ModelResult<Self> {
        let invalid = |reason: &str| ModelError::InvalidSelector {
            selector: path.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = path.strip_prefix('.').unwrap_or(path);
        if trimmed.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            let mut rest = part;
            let member_end = rest.find('[').unwrap_or(rest.len());
            let member = &rest[..member_end];
            if member.is_empty() {
                return Err(invalid("empty member name"));
            }
            segments.push(Segment::Member(member.to_string()));
            rest = &rest[member_end..];
            while !rest.is_empty() {
                match rest.strip_prefix("[*]") {
                    Some(tail) => {
                        segments.push(Segment::Each);
                        rest = tail;
                    }
                    None => return Err(invalid("only [*] is supported inside brackets")),
                }
            }
        }

        Ok(Self {
            path: trimmed.to_string(),
            segments,
        })
    }

    /// The normalized path, without a leading dot.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the selector can yield more than one reference.
    pub fn is_many(&self) -> bool {
        self.segments.contains(&Segment::Each)
    }

    /// Collects the reference keys the selector yields on `entity`.
    ///
    /// String and number leaves are keys; `null` and missing members are
    /// skipped. Duplicates are removed, first occurrence wins.
    pub fn resolve(&self, entity: &Value) -> Vec<String> {
        let mut current: Vec<&Value> = vec![entity];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Member(name) => {
                        if let Some(child) = value.get(name) {
                            next.push(child);
                        }
                    }
                    Segment::Each => {
                        if let Value::Array(items) = value {
                            next.extend(items.iter());
                        }
                    }
                }
            }
            current = next;
        }

        let mut keys: Vec<String> = Vec::new();
        for leaf in current {
            let key = match leaf {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
