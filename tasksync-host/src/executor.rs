//! Task executor: runs the tasks of one sync request against the hub.
//!
//! The executor holds no per-request mutable state; everything a request
//! accumulates lives in its [`SyncContext`]. Concurrent requests share
//! only the hub, the policy and the message handlers.

use crate::{
    AccessPolicy, AllowAllPolicy, DatabaseHub, HandlerError, HostConfig, MessageHandlers,
    SyncContext,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tasksync_model::{key_of_value, Selector};
use tasksync_protocol::{
    EntityValue, MessageResult, QueryResult, ReadResult, ReferenceSelector, ReferencesResult,
    DeleteTarget, SyncRequest, SyncResponse, TaskCommand, TaskResult, WriteResult,
    PROTOCOL_VERSION,
};
use tasksync_storage::{EntityContainer, EntityErrors, KeyedEntity, StorageError};
use tasksync_types::{EntityError, TaskErrorKind};
use tracing::{debug, info, warn};

/// Executes sync requests.
pub struct TaskExecutor {
    hub: Arc<DatabaseHub>,
    config: HostConfig,
    policy: Arc<dyn AccessPolicy>,
    handlers: MessageHandlers,
}

impl TaskExecutor {
    /// Creates an executor with the default `AllowAllPolicy`.
    pub fn new(hub: Arc<DatabaseHub>, config: HostConfig) -> Self {
        Self::with_policy(hub, config, Arc::new(AllowAllPolicy))
    }

    /// Creates an executor with a custom access policy.
    pub fn with_policy(
        hub: Arc<DatabaseHub>,
        config: HostConfig,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            hub,
            config,
            policy,
            handlers: MessageHandlers::with_std(),
        }
    }

    /// Replaces the message handlers.
    pub fn set_handlers(&mut self, handlers: MessageHandlers) {
        self.handlers = handlers;
    }

    pub fn hub(&self) -> &Arc<DatabaseHub> {
        &self.hub
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn policy(&self) -> &Arc<dyn AccessPolicy> {
        &self.policy
    }

    pub fn handlers(&self) -> &MessageHandlers {
        &self.handlers
    }

    /// Executes every task of `request` in order and returns one result
    /// per task.
    pub async fn execute_sync(&self, request: SyncRequest) -> SyncResponse {
        let mut ctx = SyncContext::for_request(&request);
        let count = request.tasks.len();
        info!(
            "Database {}: executing {} tasks (client={:?})",
            self.config.database_name, count, request.client_id
        );

        if let Some(reason) = self.reject_request(&request) {
            warn!("Rejected sync request: {}", reason);
            let tasks = (0..count)
                .map(|_| TaskResult::error(TaskErrorKind::InvalidTask, reason.clone()))
                .collect();
            return ctx.into_response(tasks);
        }

        let mut results = Vec::with_capacity(count);
        for (index, command) in request.tasks.iter().enumerate() {
            let result = self.execute_task(&mut ctx, index, command).await;
            if let Some(err) = result.task_error() {
                debug!("Task {} ({}) failed: {}", index, command.kind(), err);
            }
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!("Executed {} tasks, {} failed", count, failed);
        ctx.into_response(results)
    }

    fn reject_request(&self, request: &SyncRequest) -> Option<String> {
        if request.version != PROTOCOL_VERSION {
            return Some(format!(
                "protocol version mismatch: expected {PROTOCOL_VERSION}, got {}",
                request.version
            ));
        }
        if request.tasks.len() > self.config.max_tasks_per_request {
            return Some(format!(
                "too many tasks: {} (max {})",
                request.tasks.len(),
                self.config.max_tasks_per_request
            ));
        }
        None
    }

    /// Runs one task; a panic inside becomes an `UnhandledException` result.
    async fn execute_task(
        &self,
        ctx: &mut SyncContext,
        index: usize,
        command: &TaskCommand,
    ) -> TaskResult {
        if !self.config.catch_panics {
            return self.run_task(ctx, index, command).await;
        }
        match AssertUnwindSafe(self.run_task(ctx, index, command))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!("Task {} ({}) panicked: {}", index, command.kind(), message);
                TaskResult::error(TaskErrorKind::UnhandledException, message)
            }
        }
    }

    async fn run_task(&self, ctx: &mut SyncContext, index: usize, command: &TaskCommand) -> TaskResult {
        // Policy gate
        if let Err(reason) = self.policy.authorize(ctx, command).await {
            warn!("Policy denied task {} ({}): {}", index, command.kind(), reason);
            return TaskResult::error(TaskErrorKind::PermissionDenied, reason);
        }
        if let Err(reason) = validate(command) {
            return TaskResult::error(TaskErrorKind::InvalidTask, reason);
        }

        match command {
            TaskCommand::Message { name, params } => self.handle_message(ctx, name, params).await,
            _ => self.dispatch(ctx, command).await,
        }
    }

    async fn handle_message(&self, ctx: &SyncContext, name: &str, params: &Value) -> TaskResult {
        let Some(handler) = self.handlers.get(name) else {
            return TaskResult::error(
                TaskErrorKind::InvalidTask,
                format!("no handler for message: {name}"),
            );
        };
        match handler.handle(params, ctx).await {
            Ok(value) => TaskResult::Message(MessageResult { value }),
            Err(HandlerError::InvalidParams(reason)) => {
                TaskResult::error(TaskErrorKind::InvalidTask, reason)
            }
            Err(HandlerError::Failed(e)) => {
                warn!("Message handler {} failed: {}", name, e);
                TaskResult::error(TaskErrorKind::UnhandledException, e.to_string())
            }
        }
    }

    /// Dispatches a container command to its adapter.
    async fn dispatch(&self, ctx: &mut SyncContext, command: &TaskCommand) -> TaskResult {
        let name = command.container().unwrap_or_default();
        let Some(container) = self.hub.container(name).await else {
            return TaskResult::error(
                TaskErrorKind::InvalidTask,
                format!("container not found: {name}"),
            );
        };

        let result = match command {
            TaskCommand::Create { entities, .. } => {
                let (keyed, mut errors) = split_keyed(container.as_ref(), entities);
                match container.create_entities(keyed).await {
                    Ok(failed) => {
                        errors.extend(failed);
                        TaskResult::Create(WriteResult::with_errors(errors))
                    }
                    Err(e) => database_error(name, e),
                }
            }
            TaskCommand::Upsert { entities, .. } => {
                let (keyed, mut errors) = split_keyed(container.as_ref(), entities);
                match container.upsert_entities(keyed).await {
                    Ok(failed) => {
                        errors.extend(failed);
                        TaskResult::Upsert(WriteResult::with_errors(errors))
                    }
                    Err(e) => database_error(name, e),
                }
            }
            TaskCommand::Read {
                keys, references, ..
            } => {
                let values = match container.read_entities(keys).await {
                    Ok(values) => values,
                    Err(e) => return database_error(name, e),
                };
                let parents = found_values(&values);
                ctx.add_entities(name, values);
                let references = self.resolve_references(ctx, parents, references).await;
                TaskResult::Read(ReadResult { references })
            }
            TaskCommand::Query {
                filter, references, ..
            } => {
                let entities = match container.query_entities(filter).await {
                    Ok(entities) => entities,
                    Err(e) => return database_error(name, e),
                };
                let keys: Vec<String> = entities.iter().map(|e| e.key.clone()).collect();
                let parents: Vec<(String, Value)> = entities
                    .iter()
                    .map(|e| (e.key.clone(), e.value.clone()))
                    .collect();
                let values = entities
                    .into_iter()
                    .map(|e| (e.key, EntityValue::found(e.value)))
                    .collect();
                ctx.add_entities(name, values);
                let references = self.resolve_references(ctx, parents, references).await;
                TaskResult::Query(QueryResult { keys, references })
            }
            TaskCommand::Patch { patches, .. } => match container.patch_entities(patches).await {
                Ok(errors) => TaskResult::Patch(WriteResult::with_errors(errors)),
                Err(e) => database_error(name, e),
            },
            TaskCommand::Delete { target, .. } => match container.delete_entities(target).await {
                Ok(errors) => TaskResult::Delete(WriteResult::with_errors(errors)),
                Err(e) => database_error(name, e),
            },
            TaskCommand::Message { .. } => TaskResult::error(
                TaskErrorKind::InvalidTask,
                "message dispatched to a container",
            ),
        };

        if command.is_write() {
            self.refresh_cached(ctx, name, container.as_ref(), command).await;
        }
        result
    }

    /// Re-reads entities this request already read that `command` may have
    /// written, so later reads and reference resolutions see the write.
    async fn refresh_cached(
        &self,
        ctx: &mut SyncContext,
        name: &str,
        container: &dyn EntityContainer,
        command: &TaskCommand,
    ) {
        let stale = match command {
            TaskCommand::Create { entities, .. } | TaskCommand::Upsert { entities, .. } => {
                let keys: Vec<String> = entities
                    .iter()
                    .filter_map(|value| key_of_value(value, container.key_field()))
                    .collect();
                ctx.cached_keys(name, &keys)
            }
            TaskCommand::Patch { patches, .. } => {
                ctx.cached_keys(name, patches.iter().map(|p| &p.key))
            }
            TaskCommand::Delete {
                target: DeleteTarget::Keys(keys),
                ..
            } => ctx.cached_keys(name, keys),
            TaskCommand::Delete {
                target: DeleteTarget::All,
                ..
            } => ctx.all_cached_keys(name),
            _ => Vec::new(),
        };
        if stale.is_empty() {
            return;
        }
        debug!("{}: refreshing {} cached entities", name, stale.len());
        match container.read_entities(&stale).await {
            Ok(values) => ctx.add_entities(name, values),
            Err(e) => {
                warn!("{}: refreshing cached entities failed: {}", name, e);
                let values = stale
                    .into_iter()
                    .map(|key| {
                        let error = EntityError::read(name, &key, e.to_string());
                        (key, EntityValue::failed(error))
                    })
                    .collect();
                ctx.add_entities(name, values);
            }
        }
    }

    /// Resolves `selectors` on `parents`, recursing into nested selectors.
    fn resolve_references<'a>(
        &'a self,
        ctx: &'a mut SyncContext,
        parents: Vec<(String, Value)>,
        selectors: &'a [ReferenceSelector],
    ) -> BoxFuture<'a, Vec<ReferencesResult>> {
        async move {
            let mut results = Vec::with_capacity(selectors.len());
            for selector in selectors {
                results.push(self.resolve_reference(ctx, &parents, selector).await);
            }
            results
        }
        .boxed()
    }

    async fn resolve_reference(
        &self,
        ctx: &mut SyncContext,
        parents: &[(String, Value)],
        selector: &ReferenceSelector,
    ) -> ReferencesResult {
        let mut result = ReferencesResult::new(&selector.selector, &selector.container);
        let path = match Selector::parse(&selector.selector) {
            Ok(path) => path,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };
        let Some(target) = self.hub.container(&selector.container).await else {
            result.error = Some(format!("container not found: {}", selector.container));
            return result;
        };

        for (key, value) in parents {
            result.parents.insert(key.clone(), path.resolve(value));
        }
        let keys = result.all_keys();

        // Entities already read by this request are not fetched again.
        let unread: Vec<String> = keys
            .iter()
            .filter(|k| ctx.cached_value(&selector.container, k).is_none())
            .cloned()
            .collect();
        if !unread.is_empty() {
            match target.read_entities(&unread).await {
                Ok(values) => ctx.add_entities(&selector.container, values),
                Err(e) => {
                    warn!("Reference {} -> {} failed: {}", selector.selector, selector.container, e);
                    result.error = Some(e.to_string());
                    return result;
                }
            }
        }

        if !selector.references.is_empty() {
            let targets: Vec<(String, Value)> = keys
                .iter()
                .filter_map(|k| {
                    ctx.cached_value(&selector.container, k)
                        .map(|v| (k.clone(), v.clone()))
                })
                .collect();
            result.references = self
                .resolve_references(ctx, targets, &selector.references)
                .await;
        }
        result
    }
}

/// Structural checks that need no container access.
fn validate(command: &TaskCommand) -> Result<(), String> {
    if let Some(container) = command.container() {
        if container.is_empty() {
            return Err("container name must not be empty".to_string());
        }
    }
    match command {
        TaskCommand::Read {
            keys, references, ..
        } => {
            if keys.iter().any(String::is_empty) {
                return Err("read keys must not be empty".to_string());
            }
            validate_selectors(references)
        }
        TaskCommand::Query { references, .. } => validate_selectors(references),
        TaskCommand::Patch { patches, .. } => {
            if patches.iter().any(|p| p.key.is_empty()) {
                return Err("patch keys must not be empty".to_string());
            }
            Ok(())
        }
        TaskCommand::Delete {
            target: DeleteTarget::Keys(keys),
            ..
        } if keys.iter().any(String::is_empty) => Err("delete keys must not be empty".to_string()),
        TaskCommand::Message { name, .. } if name.is_empty() => {
            Err("message name must not be empty".to_string())
        }
        _ => Ok(()),
    }
}

fn validate_selectors(selectors: &[ReferenceSelector]) -> Result<(), String> {
    for selector in selectors {
        Selector::parse(&selector.selector).map_err(|e| e.to_string())?;
        if selector.container.is_empty() {
            return Err(format!(
                "reference '{}' has no container",
                selector.selector
            ));
        }
        validate_selectors(&selector.references)?;
    }
    Ok(())
}

/// Extracts keys from entity payloads; payloads without a usable key
/// become `ParseError`s addressed by their position.
fn split_keyed(container: &dyn EntityContainer, entities: &[Value]) -> (Vec<KeyedEntity>, EntityErrors) {
    let mut keyed = Vec::with_capacity(entities.len());
    let mut errors = EntityErrors::new();
    for (index, value) in entities.iter().enumerate() {
        let position = format!("[{index}]");
        if !value.is_object() {
            errors.insert(
                position.clone(),
                EntityError::parse(container.name(), position, "entity is not a JSON object"),
            );
            continue;
        }
        match key_of_value(value, container.key_field()) {
            Some(key) => keyed.push(KeyedEntity::new(key, value.clone())),
            None => {
                errors.insert(
                    position.clone(),
                    EntityError::parse(
                        container.name(),
                        position,
                        format!("missing key '{}'", container.key_field()),
                    ),
                );
            }
        }
    }
    (keyed, errors)
}

fn found_values(values: &BTreeMap<String, EntityValue>) -> Vec<(String, Value)> {
    values
        .iter()
        .filter_map(|(key, entry)| entry.value.as_ref().map(|v| (key.clone(), v.clone())))
        .collect()
}

fn database_error(container: &str, error: StorageError) -> TaskResult {
    warn!("Container {} failed: {}", container, error);
    TaskResult::error(TaskErrorKind::DatabaseError, error.to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
