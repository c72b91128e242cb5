//! Client-side entity task graph for tasksync.
//!
//! An application registers operations on [`EntitySet`]s (one per
//! container), gets typed task handles back and commits everything in a
//! single round trip with [`SyncClient::sync`].
//!
//! # Model
//!
//! - **Peers**: every key an entity set has seen maps to one peer holding
//!   the live entity, its last synced snapshot and outstanding tasks.
//!   Peers live as long as the set.
//! - **Tasks**: deferred operations that move once from `Pending` to
//!   `Synced` or `Failed`. Reading a result early is a
//!   [`TaskAccessError::NotSynced`].
//! - **Dedup**: reads by key, queries by filter fingerprint and
//!   reference sub-tasks by selector collapse into one task per cycle.
//! - **Patches**: changes are found by diffing the live entity against
//!   its snapshot; the snapshot moves only when the host confirms.
//! - **References**: `read_ref` / `read_refs` on a read or query resolve
//!   selector paths into entities of another set in the same round trip.

mod client;
mod config;
mod entity_set;
mod error;
mod peer;
mod reference;
mod result;
mod set_sync;
mod task;
mod transport;

pub use client::SyncClient;
pub use config::ClientConfig;
pub use entity_set::EntitySet;
pub use error::{ClientError, ClientResult, TaskAccessError, TransportError};
pub use peer::PeerInfo;
pub use reference::{ReadRefTask, ReadRefsTask};
pub use result::{SyncFailed, SyncResult};
pub use task::{
    CreateTask, DeleteTask, DetectPatchesTask, MessageTask, PatchTask, QueryTask, ReadTask,
    TaskState, TaskSummary, UpsertTask,
};
pub use transport::SyncTransport;
