//! Storage layer for tasksync.
//!
//! A container is a named collection of entities owned by a storage
//! adapter. The host executor talks to every adapter through
//! [`EntityContainer`]; concrete adapters (files, SQL, remote stores) live
//! outside this workspace. [`MemoryContainer`] is the in-process adapter
//! used by tests and embedders.
//!
//! # Contract
//!
//! - Writes report failures per key; one bad entity never fails the others.
//! - Reads distinguish a missing key from a failed one.
//! - A returned `Err` means the adapter failed as a whole and is reported
//!   as a database error for the task.
//! - Adapters are shared across concurrent requests and must be safe under
//!   concurrent invocation.

mod container;
mod error;
mod memory;

pub use container::{EntityContainer, EntityErrors, KeyedEntity};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryContainer;
