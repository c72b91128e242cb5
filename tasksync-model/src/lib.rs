//! Entity model for tasksync.
//!
//! Defines the types the client task graph and the host executor agree on:
//! - [`Entity`]: an identity-keyed record stored in a named container
//! - [`Ref`]: a lazy, typed reference to another entity
//! - [`diff_values`] / [`apply_patches`]: structural change detection over JSON
//! - [`Filter`]: a query predicate with a canonical printable fingerprint
//! - [`Selector`]: a reference path evaluated against a parent entity

mod diff;
mod entity;
mod error;
mod filter;
mod reference;
mod selector;

pub use diff::{apply_patches, diff_values, MemberPatch};
pub use entity::{assign_key, from_value, key_of_value, to_value, Entity};
pub use error::{ModelError, ModelResult};
pub use filter::Filter;
pub use reference::{PeerHandle, Ref, RefField};
pub use selector::{Segment, Selector};
