//! Batch sync protocol messages and types.
//!
//! The protocol is a single request-response round trip:
//! 1. The client sends a [`SyncRequest`] holding an ordered list of
//!    [`TaskCommand`]s, one per container operation it batched.
//! 2. The host executes the commands in order and answers with a
//!    [`SyncResponse`] whose `tasks[i]` answers `request.tasks[i]`, plus
//!    the entities it read, grouped by container, for the client to apply.

mod command;
mod result;

pub use command::{DeleteTarget, EntityPatch, ReferenceSelector, SyncRequest, TaskCommand};
pub use result::{
    ContainerEntities, EntityValue, MessageResult, QueryResult, ReadResult, ReferencesResult,
    SyncResponse, TaskErrorResult, TaskResult, WriteResult,
};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default upper bound on commands in one request.
pub const MAX_TASKS_PER_REQUEST: usize = 1000;
