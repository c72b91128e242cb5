//! Query filters.
//!
//! A [`Filter`] is a predicate over the JSON form of an entity. Its
//! `Display` output is canonical: two structurally identical filters print
//! the same, which is what the client uses to deduplicate queries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A predicate over entity members addressed by JSON pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Matches every entity.
    All,
    Eq { field: String, value: Value },
    NotEq { field: String, value: Value },
    Gt { field: String, value: Value },
    Ge { field: String, value: Value },
    Lt { field: String, value: Value },
    Le { field: String, value: Value },
    /// String contains a substring, or array contains an element.
    Contains { field: String, value: Value },
    /// Member equals one of `values`.
    In { field: String, values: Vec<Value> },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

fn pointer(field: &str) -> String {
    if field.starts_with('/') || field.is_empty() {
        field.to_string()
    } else {
        format!("/{field}")
    }
}

impl Filter {
    pub fn eq(field: &str, value: Value) -> Self {
        Self::Eq { field: pointer(field), value }
    }

    pub fn not_eq(field: &str, value: Value) -> Self {
        Self::NotEq { field: pointer(field), value }
    }

    pub fn gt(field: &str, value: Value) -> Self {
        Self::Gt { field: pointer(field), value }
    }

    pub fn ge(field: &str, value: Value) -> Self {
        Self::Ge { field: pointer(field), value }
    }

    pub fn lt(field: &str, value: Value) -> Self {
        Self::Lt { field: pointer(field), value }
    }

    pub fn le(field: &str, value: Value) -> Self {
        Self::Le { field: pointer(field), value }
    }

    pub fn contains(field: &str, value: Value) -> Self {
        Self::Contains { field: pointer(field), value }
    }

    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Self::In { field: pointer(field), values }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And { filters }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or { filters }
    }

    pub fn not(filter: Filter) -> Self {
        Self::Not { filter: Box::new(filter) }
    }

    /// Canonical printable form used as the dedup key for queries.
    pub fn fingerprint(&self) -> String {
        self.to_string()
    }

    /// Evaluates the filter against an entity's JSON form.
    pub fn matches(&self, entity: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Eq { field, value } => entity.pointer(field).is_some_and(|v| values_equal(v, value)),
            Self::NotEq { field, value } => !entity.pointer(field).is_some_and(|v| values_equal(v, value)),
            Self::Gt { field, value } => compare_at(entity, field, value) == Some(Ordering::Greater),
            Self::Ge { field, value } => matches!(
                compare_at(entity, field, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt { field, value } => compare_at(entity, field, value) == Some(Ordering::Less),
            Self::Le { field, value } => matches!(
                compare_at(entity, field, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Contains { field, value } => match (entity.pointer(field), value) {
                (Some(Value::String(s)), Value::String(needle)) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), _) => items.iter().any(|item| values_equal(item, value)),
                _ => false,
            },
            Self::In { field, values } => entity
                .pointer(field)
                .is_some_and(|v| values.iter().any(|candidate| values_equal(v, candidate))),
            Self::And { filters } => filters.iter().all(|f| f.matches(entity)),
            Self::Or { filters } => filters.iter().any(|f| f.matches(entity)),
            Self::Not { filter } => !filter.matches(entity),
        }
    }
}

/// Numbers compare by value so that `1` equals `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_at(entity: &Value, field: &str, value: &Value) -> Option<Ordering> {
    match (entity.pointer(field)?, value) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, filters: &[Filter], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{filter}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("true"),
            Self::Eq { field, value } => write!(f, "{field} == {value}"),
            Self::NotEq { field, value } => write!(f, "{field} != {value}"),
            Self::Gt { field, value } => write!(f, "{field} > {value}"),
            Self::Ge { field, value } => write!(f, "{field} >= {value}"),
            Self::Lt { field, value } => write!(f, "{field} < {value}"),
            Self::Le { field, value } => write!(f, "{field} <= {value}"),
            Self::Contains { field, value } => write!(f, "{field} contains {value}"),
            Self::In { field, values } => {
                write!(f, "{field} in [")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Self::And { filters } => write_joined(f, filters, "&&"),
            Self::Or { filters } => write_joined(f, filters, "||"),
            Self::Not { filter } => write!(f, "!({filter})"),
        }
    }
}
