//! Host-side task execution for tasksync.
//!
//! The host receives one [`SyncRequest`](tasksync_protocol::SyncRequest)
//! per client round trip and answers with one
//! [`SyncResponse`](tasksync_protocol::SyncResponse).
//!
//! # Pipeline
//!
//! For every request the [`TaskExecutor`] runs a linear pipeline:
//!
//! 1. **Received**: version and size checks
//! 2. **Authorizing**: the [`AccessPolicy`] is asked once per task
//! 3. **Executing**: the task is dispatched to the addressed container
//!    (or message handler), strictly in request order
//! 4. **Aggregating**: entity results are merged per container and
//!    reference selectors are resolved
//! 5. **Responded**: one result per task, in request order
//!
//! A failing task never aborts the batch: denials, storage errors and
//! panics are converted into that task's result and execution continues.

mod config;
mod context;
mod error;
mod executor;
mod hub;
mod message;
mod policy;

pub use config::HostConfig;
pub use context::SyncContext;
pub use error::{HostError, HostResult};
pub use executor::TaskExecutor;
pub use hub::DatabaseHub;
pub use message::{HandlerError, MessageHandler, MessageHandlers};
pub use policy::{AccessPolicy, AccessRules, AllowAllPolicy, ContainerAccessPolicy, Operation};
