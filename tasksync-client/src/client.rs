//! Sync orchestration.
//!
//! A cycle runs in three phases:
//!
//! 1. **Emit** (synchronous, serialized across cycles): trace embedded
//!    entities, take every set's pending tasks and build one
//!    [`SyncRequest`]: all writes first, then all reads and queries,
//!    then messages.
//! 2. **Round trip**: the only suspension point, bounded by the
//!    configured timeout and the cancellation token.
//! 3. **Apply**: bind returned entities to peers, then route each task
//!    result to its handle, parents before sub-tasks. On transport
//!    failure every task of the cycle fails with `SyncError`.
//!
//! Tasks taken into a cycle are settled even if the cycle future is
//! dropped mid-flight: they fail with `SyncError` then.

use crate::config::ClientConfig;
use crate::entity_set::{EntitySet, ErasedSet, RefBinder, SetInner};
use crate::error::{ClientError, ClientResult};
use crate::result::{SyncFailed, SyncResult};
use crate::set_sync::CycleTasks;
use crate::task::MessageTask;
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tasksync_model::Entity;
use tasksync_protocol::{SyncRequest, SyncResponse, TaskCommand, TaskResult};
use tasksync_types::{ClientId, TaskError, TaskId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct PendingMessage {
    name: String,
    params: Value,
    task: MessageTask,
}

/// One cycle after emission.
struct Prepared {
    sets: Vec<Arc<dyn ErasedSet>>,
    tasks: InFlight,
    commands: Vec<TaskCommand>,
    message_base: usize,
}

/// The tasks taken into a cycle. Dropped unsettled, it fails them all.
struct InFlight {
    cycles: Vec<Box<dyn CycleTasks>>,
    messages: Vec<PendingMessage>,
    settled: bool,
}

impl InFlight {
    fn fail(&mut self, error: &TaskError) {
        for cycle in &self.cycles {
            cycle.fail(error);
        }
        for message in &self.messages {
            message.task.cell.fail(error.clone());
        }
        self.settled = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Sync cycle dropped before completion");
            self.fail(&TaskError::sync_error("sync cancelled"));
        }
    }
}

/// Builds task graphs over entity sets and syncs them with a host.
pub struct SyncClient {
    transport: Arc<dyn SyncTransport>,
    config: ClientConfig,
    client_id: String,
    ids: Arc<AtomicU64>,
    sets: Mutex<Vec<Arc<dyn ErasedSet>>>,
    messages: Mutex<Vec<PendingMessage>>,
    emission: Mutex<()>,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn SyncTransport>, config: ClientConfig) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| ClientId::new().as_uuid().to_string());
        Self {
            transport,
            config,
            client_id,
            ids: Arc::new(AtomicU64::new(1)),
            sets: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            emission: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The entity set of `T::CONTAINER`, created on first use.
    pub fn entity_set<T: Entity>(&self) -> ClientResult<EntitySet<T>> {
        let mut sets = self.sets.lock();
        if let Some(set) = sets.iter().find(|s| s.container() == T::CONTAINER) {
            return Arc::clone(set)
                .into_any()
                .downcast::<SetInner<T>>()
                .map(EntitySet::from_inner)
                .map_err(|_| ClientError::ContainerType {
                    container: T::CONTAINER.to_string(),
                });
        }
        let set = EntitySet::<T>::new(Arc::clone(&self.ids));
        sets.push(set.inner().clone());
        Ok(set)
    }

    /// Queues a message for the host's handler `name`.
    pub fn send_message(&self, name: &str, params: Value) -> MessageTask {
        let task = MessageTask::new(TaskId::next(&self.ids), name);
        self.messages.lock().push(PendingMessage {
            name: name.to_string(),
            params,
            task: task.clone(),
        });
        task
    }

    /// Syncs all pending tasks. Fails with an aggregate error listing
    /// every failed task.
    pub async fn sync(&self) -> Result<SyncResult, SyncFailed> {
        into_outcome(self.try_sync().await)
    }

    /// Syncs all pending tasks; the caller inspects the result.
    pub async fn try_sync(&self) -> SyncResult {
        self.run_cycle(CancellationToken::new()).await
    }

    /// Like [`sync`](Self::sync), aborted when `token` is cancelled.
    pub async fn sync_with_cancel(&self, token: &CancellationToken) -> Result<SyncResult, SyncFailed> {
        into_outcome(self.run_cycle(token.clone()).await)
    }

    fn prepare(&self) -> Prepared {
        let _emission = self.emission.lock();
        let sets = self.sets.lock().clone();

        let mut embedded: Vec<_> = sets.iter().flat_map(|s| s.embedded_refs()).collect();
        while let Some(next) = embedded.pop() {
            match sets.iter().find(|s| s.container() == next.container) {
                Some(set) => embedded.extend(set.create_embedded(&next.key, next.value)),
                None => warn!(
                    "No entity set for embedded entity {} [{}]",
                    next.container, next.key
                ),
            }
        }

        let mut cycles: Vec<Box<dyn CycleTasks>> =
            sets.iter().map(|s| Arc::clone(s).begin_cycle()).collect();
        let messages = std::mem::take(&mut *self.messages.lock());

        let mut commands = Vec::new();
        for cycle in &mut cycles {
            cycle.emit_writes(&mut commands);
        }
        for cycle in &mut cycles {
            cycle.emit_reads(&mut commands);
        }
        let message_base = commands.len();
        commands.extend(messages.iter().map(|m| TaskCommand::Message {
            name: m.name.clone(),
            params: m.params.clone(),
        }));

        Prepared {
            sets,
            tasks: InFlight {
                cycles,
                messages,
                settled: false,
            },
            commands,
            message_base,
        }
    }

    async fn run_cycle(&self, token: CancellationToken) -> SyncResult {
        let Prepared {
            sets,
            mut tasks,
            commands,
            message_base,
        } = self.prepare();

        let outcome = if commands.is_empty() {
            Ok(SyncResponse::default())
        } else {
            self.round_trip(commands, &token).await
        };

        match &outcome {
            Ok(response) => {
                let binder = RefBinder::new(&sets);
                for cycle in &tasks.cycles {
                    cycle.bind_entities(response, &binder);
                }
                for cycle in &tasks.cycles {
                    cycle.apply(response, &binder);
                }
                for (offset, message) in tasks.messages.iter().enumerate() {
                    apply_message(&message.task, response.tasks.get(message_base + offset));
                }
                tasks.settled = true;
            }
            Err(error) => {
                warn!("Sync cycle failed: {}", error);
                tasks.fail(error);
            }
        }

        let mut summaries = Vec::new();
        for cycle in &tasks.cycles {
            cycle.collect(&mut summaries);
        }
        summaries.extend(tasks.messages.iter().map(|m| m.task.cell.summary()));
        let result = SyncResult::new(summaries);
        info!(
            "Sync cycle done: {} tasks, {} failed",
            result.tasks.len(),
            result.failed.len()
        );
        result
    }

    async fn round_trip(
        &self,
        commands: Vec<TaskCommand>,
        token: &CancellationToken,
    ) -> Result<SyncResponse, TaskError> {
        let count = commands.len();
        let mut request = SyncRequest::new(commands).with_client_id(self.client_id.as_str());
        if let Some(user_id) = &self.config.user_id {
            request = request.with_user_id(user_id.as_str());
        }
        debug!("Sending sync request: {} tasks", count);

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let response = tokio::select! {
            _ = token.cancelled() => {
                info!("Sync cycle cancelled");
                return Err(TaskError::sync_error("sync cancelled"));
            }
            result = tokio::time::timeout(timeout, self.transport.execute(request)) => match result {
                Err(_) => {
                    return Err(TaskError::sync_error(format!(
                        "sync timed out after {} ms",
                        self.config.timeout_ms
                    )));
                }
                Ok(Err(e)) => return Err(TaskError::sync_error(e.to_string())),
                Ok(Ok(response)) => response,
            },
        };

        if response.tasks.len() != count {
            warn!(
                "Protocol violation: {} task results for {} tasks",
                response.tasks.len(),
                count
            );
            return Err(TaskError::sync_error(format!(
                "expected {count} task results, got {}",
                response.tasks.len()
            )));
        }
        Ok(response)
    }
}

fn apply_message(task: &MessageTask, result: Option<&TaskResult>) {
    match result {
        Some(TaskResult::Message(message)) => task.cell.complete(message.value.clone()),
        Some(other) => task.cell.fail(other.task_error().unwrap_or_else(|| {
            TaskError::invalid_operation("unexpected result for message")
        })),
        None => task
            .cell
            .fail(TaskError::invalid_operation("missing result for message")),
    }
}

fn into_outcome(result: SyncResult) -> Result<SyncResult, SyncFailed> {
    if result.success() {
        Ok(result)
    } else {
        Err(SyncFailed { result })
    }
}
