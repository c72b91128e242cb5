//! Per-cycle scheduling for one entity set.
//!
//! [`EntitySetSync`] collects the tasks registered on a set since the last
//! emission, deduplicated by key, filter fingerprint or selector. At sync
//! time it is taken out of the set as a whole and wrapped in a
//! [`SetCycle`], which builds the outgoing commands and later routes the
//! results back onto the task handles and peers.
//!
//! Commands are emitted in two phases across all sets of a cycle: first
//! every set's writes (create, upsert, patch, delete), then every set's
//! reads and queries, so a read observes the writes of the same request
//! whatever set they belong to.

use crate::entity_set::{RefBinder, SetInner};
use crate::peer::PeerEntity;
use crate::reference::merge_selector;
use crate::task::{QueryTask, ReadTask, TaskSummary, WriteCell};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tasksync_model::{from_value, to_value, Entity, MemberPatch};
use tasksync_protocol::{
    DeleteTarget, EntityPatch, EntityValue, SyncResponse, TaskCommand, TaskResult,
};
use tasksync_types::{EntityError, TaskError};
use tracing::{debug, warn};

type KeyErrors = BTreeMap<String, EntityError>;

/// A staged patch and the live value it was computed from.
pub(crate) struct PendingPatch {
    pub(crate) members: Vec<MemberPatch>,
    pub(crate) snapshot: Value,
}

/// Pending tasks of one entity set since the last emission.
#[derive(Default)]
pub(crate) struct EntitySetSync<T: Entity> {
    pub(crate) reads: BTreeMap<String, ReadTask<T>>,
    pub(crate) queries: Vec<QueryTask<T>>,
    pub(crate) creates: BTreeSet<String>,
    pub(crate) create_tasks: Vec<Arc<WriteCell>>,
    pub(crate) upserts: BTreeSet<String>,
    pub(crate) upsert_tasks: Vec<Arc<WriteCell>>,
    /// Keys whose changes are detected at emission.
    pub(crate) patch_keys: BTreeSet<String>,
    pub(crate) patches: BTreeMap<String, PendingPatch>,
    pub(crate) patch_tasks: Vec<Arc<WriteCell>>,
    pub(crate) deletes: BTreeSet<String>,
    pub(crate) delete_all: bool,
    pub(crate) delete_tasks: Vec<Arc<WriteCell>>,
    /// Failures found before anything was sent, per write kind.
    pub(crate) create_errors: KeyErrors,
    pub(crate) upsert_errors: KeyErrors,
    pub(crate) patch_errors: KeyErrors,
}

impl<T: Entity> EntitySetSync<T> {
    /// Replaces the staged patch of the peer's key.
    pub(crate) fn stage_patch(&mut self, patch: EntityPatch, snapshot: Value) {
        self.patches.insert(
            patch.key,
            PendingPatch {
                members: patch.members,
                snapshot,
            },
        );
    }

    /// Drops the staged patch of `key`, clearing the peer's pending
    /// snapshot if it belongs to that patch.
    pub(crate) fn unstage_patch(&mut self, peer: Option<&mut PeerEntity<T>>, key: &str) {
        self.patch_keys.remove(key);
        if let Some(staged) = self.patches.remove(key) {
            if let Some(peer) = peer {
                if peer.pending_snapshot.as_ref() == Some(&staged.snapshot) {
                    peer.pending_snapshot = None;
                }
            }
        }
    }

    /// Whether `key` has a create, upsert, patch or delete registered.
    pub(crate) fn has_writes(&self, key: &str) -> bool {
        self.delete_all
            || self.creates.contains(key)
            || self.upserts.contains(key)
            || self.patch_keys.contains(key)
            || self.patches.contains_key(key)
            || self.deletes.contains(key)
    }

    /// Runs change detection on one peer and stages the result.
    pub(crate) fn detect(&mut self, peer: &mut PeerEntity<T>) -> Option<EntityPatch> {
        // Create supersedes patch.
        if self.creates.contains(&peer.key) {
            return None;
        }
        match peer.detect_change() {
            Ok(Some((patch, live))) => {
                self.stage_patch(patch.clone(), live);
                Some(patch)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{} [{}]: change detection failed: {}", T::CONTAINER, peer.key, e);
                self.patch_errors.insert(
                    peer.key.clone(),
                    EntityError::patch(T::CONTAINER, &peer.key, e.to_string()),
                );
                None
            }
        }
    }
}

/// Erased view of one set's share of a sync cycle.
pub(crate) trait CycleTasks: Send {
    /// Emits create, upsert, patch and delete commands.
    fn emit_writes(&mut self, commands: &mut Vec<TaskCommand>);

    /// Emits read and query commands.
    fn emit_reads(&mut self, commands: &mut Vec<TaskCommand>);

    /// Binds entities returned by the host to their peers. Peers written
    /// in this cycle, or with writes pending for the next one, keep their
    /// live entity.
    fn bind_entities(&self, response: &SyncResponse, binder: &RefBinder);

    fn apply(&self, response: &SyncResponse, binder: &RefBinder);

    fn fail(&self, error: &TaskError);

    fn collect(&self, out: &mut Vec<TaskSummary>);
}

#[derive(Default)]
struct Emitted {
    create: Option<usize>,
    upsert: Option<usize>,
    patch: Option<usize>,
    delete: Option<usize>,
    read: Option<usize>,
    queries: Vec<usize>,
    created: BTreeMap<String, Value>,
    upserted: BTreeMap<String, Value>,
}

/// The pending tasks of one set taken into a sync cycle.
pub(crate) struct SetCycle<T: Entity> {
    set: Arc<SetInner<T>>,
    sync: EntitySetSync<T>,
    emitted: Emitted,
}

impl<T: Entity> SetCycle<T> {
    pub(crate) fn new(set: Arc<SetInner<T>>, sync: EntitySetSync<T>) -> Self {
        Self {
            set,
            sync,
            emitted: Emitted::default(),
        }
    }

    fn write_outcome(
        &self,
        response: &SyncResponse,
        index: Option<usize>,
        local: &KeyErrors,
    ) -> Result<KeyErrors, TaskError> {
        let mut errors = local.clone();
        let Some(index) = index else {
            return Ok(errors);
        };
        match response.tasks.get(index) {
            Some(TaskResult::Error(e)) => Err(TaskError::new(e.kind, e.message.clone())),
            Some(
                TaskResult::Create(w)
                | TaskResult::Upsert(w)
                | TaskResult::Patch(w)
                | TaskResult::Delete(w),
            ) => {
                errors.extend(w.errors.clone());
                Ok(errors)
            }
            Some(_) => Err(TaskError::invalid_operation(format!(
                "unexpected result for task {index}"
            ))),
            None => Err(TaskError::invalid_operation(format!(
                "missing result for task {index}"
            ))),
        }
    }

    fn apply_peers(
        &self,
        creates: &Result<KeyErrors, TaskError>,
        upserts: &Result<KeyErrors, TaskError>,
        patches: &Result<KeyErrors, TaskError>,
        deletes: &Result<KeyErrors, TaskError>,
    ) {
        let mut peers = self.set.peers.lock();

        for key in &self.sync.creates {
            let Some(peer) = peers.get_mut(key) else { continue };
            peer.create_task = None;
            match (key_failed(creates, key), self.emitted.created.get(key)) {
                (false, Some(value)) => peer.snapshot = Some(value.clone()),
                _ if peer.snapshot.is_none() => peer.assigned = false,
                _ => {}
            }
        }
        for key in &self.sync.upserts {
            if let (false, Some(value), Some(peer)) = (
                key_failed(upserts, key),
                self.emitted.upserted.get(key),
                peers.get_mut(key),
            ) {
                peer.assigned = true;
                peer.snapshot = Some(value.clone());
            }
        }
        for (key, staged) in &self.sync.patches {
            let Some(peer) = peers.get_mut(key) else { continue };
            let in_flight = peer.pending_snapshot.as_ref() == Some(&staged.snapshot);
            if !key_failed(patches, key) {
                peer.snapshot = Some(staged.snapshot.clone());
            }
            if in_flight {
                peer.pending_snapshot = None;
            }
        }
        if deletes.is_ok() {
            if self.sync.delete_all {
                peers.clear();
            } else {
                for key in &self.sync.deletes {
                    if !key_failed(deletes, key) {
                        peers.remove(key);
                    }
                }
            }
        }
        for key in self.sync.reads.keys() {
            if let Some(peer) = peers.get_mut(key) {
                peer.read_task = None;
            }
        }
    }

    fn apply_reads(&self, response: &SyncResponse, binder: &RefBinder) {
        let Some(index) = self.emitted.read else { return };
        let references = match response.tasks.get(index) {
            Some(TaskResult::Read(result)) => &result.references,
            other => {
                let error = unexpected(other, index);
                for read in self.sync.reads.values() {
                    read.inner().refs.fail(&error);
                    read.inner().cell.fail(error.clone());
                }
                return;
            }
        };

        for (key, read) in &self.sync.reads {
            let inner = read.inner();
            match response.entity(T::CONTAINER, key) {
                Some(EntityValue {
                    value: Some(value), ..
                }) => match from_value::<T>(value.clone()) {
                    Ok(mut entity) => {
                        binder.bind(&mut entity);
                        inner.cell.complete(Some(entity));
                        inner
                            .refs
                            .apply(std::slice::from_ref(key), references, response, binder);
                    }
                    Err(e) => {
                        let error = single_error(EntityError::parse(T::CONTAINER, key, e.to_string()));
                        inner.refs.fail(&error);
                        inner.cell.fail(error);
                    }
                },
                Some(EntityValue {
                    error: Some(error), ..
                }) => {
                    let error = single_error(error.clone());
                    inner.refs.fail(&error);
                    inner.cell.fail(error);
                }
                _ => {
                    inner.cell.complete(None);
                    inner.refs.apply(&[], references, response, binder);
                }
            }
        }
    }

    fn apply_queries(&self, response: &SyncResponse, binder: &RefBinder) {
        for (query, index) in self.sync.queries.iter().zip(&self.emitted.queries) {
            let inner = query.inner();
            let result = match response.tasks.get(*index) {
                Some(TaskResult::Query(result)) => result,
                other => {
                    let error = unexpected(other, *index);
                    inner.refs.fail(&error);
                    inner.cell.fail(error);
                    continue;
                }
            };

            let mut entities = Vec::with_capacity(result.keys.len());
            let mut errors = KeyErrors::new();
            for key in &result.keys {
                let value = response
                    .entity(T::CONTAINER, key)
                    .and_then(|v| v.value.clone());
                match value.map(from_value::<T>) {
                    Some(Ok(mut entity)) => {
                        binder.bind(&mut entity);
                        entities.push(entity);
                    }
                    Some(Err(e)) => {
                        errors.insert(key.clone(), EntityError::parse(T::CONTAINER, key, e.to_string()));
                    }
                    None => {
                        errors.insert(
                            key.clone(),
                            EntityError::read(T::CONTAINER, key, "query result without value"),
                        );
                    }
                }
            }
            if !errors.is_empty() {
                let error = TaskError::from_entity_errors(errors);
                inner.refs.fail(&error);
                inner.cell.fail(error);
                continue;
            }
            *inner.keys.lock() = result.keys.clone();
            inner.cell.complete(entities);
            inner
                .refs
                .apply(&result.keys, &result.references, response, binder);
        }
    }
}

impl<T: Entity> CycleTasks for SetCycle<T> {
    fn emit_writes(&mut self, commands: &mut Vec<TaskCommand>) {
        let container = T::CONTAINER.to_string();
        let set = Arc::clone(&self.set);
        let peers = set.peers.lock();

        self.emitted.created = entity_values(&peers, &self.sync.creates, &mut self.sync.create_errors);
        if !self.emitted.created.is_empty() {
            self.emitted.create = Some(commands.len());
            commands.push(TaskCommand::Create {
                container: container.clone(),
                entities: self.emitted.created.values().cloned().collect(),
            });
        }

        self.emitted.upserted = entity_values(&peers, &self.sync.upserts, &mut self.sync.upsert_errors);
        if !self.emitted.upserted.is_empty() {
            self.emitted.upsert = Some(commands.len());
            commands.push(TaskCommand::Upsert {
                container: container.clone(),
                entities: self.emitted.upserted.values().cloned().collect(),
            });
        }
        drop(peers);

        if !self.sync.patches.is_empty() {
            self.emitted.patch = Some(commands.len());
            commands.push(TaskCommand::Patch {
                container: container.clone(),
                patches: self
                    .sync
                    .patches
                    .iter()
                    .map(|(key, staged)| EntityPatch::new(key.clone(), staged.members.clone()))
                    .collect(),
            });
        }

        let delete_target = if self.sync.delete_all {
            Some(DeleteTarget::All)
        } else if !self.sync.deletes.is_empty() {
            Some(DeleteTarget::Keys(self.sync.deletes.iter().cloned().collect()))
        } else {
            None
        };
        if let Some(target) = delete_target {
            self.emitted.delete = Some(commands.len());
            commands.push(TaskCommand::Delete {
                container: container.clone(),
                target,
            });
        }
    }

    fn emit_reads(&mut self, commands: &mut Vec<TaskCommand>) {
        let container = T::CONTAINER.to_string();
        if !self.sync.reads.is_empty() {
            let mut references = Vec::new();
            for read in self.sync.reads.values() {
                for selector in read.inner().refs.freeze() {
                    merge_selector(&mut references, selector);
                }
            }
            self.emitted.read = Some(commands.len());
            commands.push(TaskCommand::Read {
                container: container.clone(),
                keys: self.sync.reads.keys().cloned().collect(),
                references,
            });
        }

        for query in &self.sync.queries {
            self.emitted.queries.push(commands.len());
            commands.push(TaskCommand::Query {
                container: container.clone(),
                filter: query.filter().clone(),
                references: query.inner().refs.freeze(),
            });
        }
        debug!("{}: emitted {} commands", T::CONTAINER, self.command_count());
    }

    fn bind_entities(&self, response: &SyncResponse, binder: &RefBinder) {
        let Some(entities) = response.containers.get(T::CONTAINER) else {
            return;
        };
        let pending = self.set.pending.lock();
        let mut peers = self.set.peers.lock();
        for (key, entry) in &entities.entities {
            let Some(value) = &entry.value else { continue };
            if self.sync.has_writes(key) || pending.has_writes(key) {
                debug!("{} [{}]: keeping live entity of written peer", T::CONTAINER, key);
                continue;
            }
            match from_value::<T>(value.clone()) {
                Ok(mut entity) => {
                    binder.bind(&mut entity);
                    peers
                        .entry(key.clone())
                        .or_insert_with(|| PeerEntity::unassigned(key))
                        .assign_synced(entity, value.clone());
                }
                Err(e) => debug!("{} [{}]: cannot bind entity: {}", T::CONTAINER, key, e),
            }
        }
    }

    fn apply(&self, response: &SyncResponse, binder: &RefBinder) {
        let creates = self.write_outcome(response, self.emitted.create, &self.sync.create_errors);
        let upserts = self.write_outcome(response, self.emitted.upsert, &self.sync.upsert_errors);
        let patches = self.write_outcome(response, self.emitted.patch, &self.sync.patch_errors);
        let deletes = self.write_outcome(response, self.emitted.delete, &KeyErrors::new());

        self.apply_peers(&creates, &upserts, &patches, &deletes);

        for cell in &self.sync.create_tasks {
            finish_write(cell, &creates, None);
        }
        for cell in &self.sync.upsert_tasks {
            finish_write(cell, &upserts, None);
        }
        for cell in &self.sync.patch_tasks {
            // A key superseded by a create reports the create's outcome.
            finish_write(cell, &patches, Some((&self.sync.creates, &creates)));
        }
        for cell in &self.sync.delete_tasks {
            finish_write(cell, &deletes, None);
        }
        self.apply_reads(response, binder);
        self.apply_queries(response, binder);
    }

    fn fail(&self, error: &TaskError) {
        {
            let mut peers = self.set.peers.lock();
            for key in &self.sync.creates {
                if let Some(peer) = peers.get_mut(key) {
                    peer.create_task = None;
                    if peer.snapshot.is_none() {
                        peer.assigned = false;
                    }
                }
            }
            for (key, staged) in &self.sync.patches {
                if let Some(peer) = peers.get_mut(key) {
                    if peer.pending_snapshot.as_ref() == Some(&staged.snapshot) {
                        peer.pending_snapshot = None;
                    }
                }
            }
            for key in self.sync.reads.keys() {
                if let Some(peer) = peers.get_mut(key) {
                    peer.read_task = None;
                }
            }
        }

        let writes = self
            .sync
            .create_tasks
            .iter()
            .chain(&self.sync.upsert_tasks)
            .chain(&self.sync.patch_tasks)
            .chain(&self.sync.delete_tasks);
        for cell in writes {
            cell.cell.fail(error.clone());
        }
        for read in self.sync.reads.values() {
            read.inner().refs.fail(error);
            read.inner().cell.fail(error.clone());
        }
        for query in &self.sync.queries {
            query.inner().refs.fail(error);
            query.inner().cell.fail(error.clone());
        }
    }

    fn collect(&self, out: &mut Vec<TaskSummary>) {
        let writes = self
            .sync
            .create_tasks
            .iter()
            .chain(&self.sync.upsert_tasks)
            .chain(&self.sync.patch_tasks)
            .chain(&self.sync.delete_tasks);
        for cell in writes {
            out.push(cell.cell.summary());
        }
        for read in self.sync.reads.values() {
            out.push(read.inner().cell.summary());
            read.inner().refs.collect(out);
        }
        for query in &self.sync.queries {
            out.push(query.inner().cell.summary());
            query.inner().refs.collect(out);
        }
    }
}

impl<T: Entity> SetCycle<T> {
    fn command_count(&self) -> usize {
        [
            self.emitted.create,
            self.emitted.upsert,
            self.emitted.patch,
            self.emitted.delete,
            self.emitted.read,
        ]
        .iter()
        .flatten()
        .count()
            + self.emitted.queries.len()
    }
}

/// Live values of `keys`, serialized at emission.
fn entity_values<T: Entity>(
    peers: &HashMap<String, PeerEntity<T>>,
    keys: &BTreeSet<String>,
    errors: &mut KeyErrors,
) -> BTreeMap<String, Value> {
    let mut values = BTreeMap::new();
    for key in keys {
        let Some(peer) = peers.get(key) else { continue };
        match to_value(&peer.entity) {
            Ok(value) => {
                values.insert(key.clone(), value);
            }
            Err(e) => {
                errors.insert(key.clone(), EntityError::parse(T::CONTAINER, key, e.to_string()));
            }
        }
    }
    values
}

fn key_failed(outcome: &Result<KeyErrors, TaskError>, key: &str) -> bool {
    match outcome {
        Ok(errors) => errors.contains_key(key),
        Err(_) => true,
    }
}

fn finish_write(
    cell: &WriteCell,
    outcome: &Result<KeyErrors, TaskError>,
    superseded_by: Option<(&BTreeSet<String>, &Result<KeyErrors, TaskError>)>,
) {
    let errors = match outcome {
        Ok(errors) => errors,
        Err(error) => {
            cell.cell.fail(error.clone());
            return;
        }
    };

    let mut failed = KeyErrors::new();
    if cell.all {
        failed.extend(errors.clone());
    }
    for key in &cell.keys {
        let error = match superseded_by {
            Some((creates, create_outcome)) if creates.contains(key) => match create_outcome {
                Ok(create_errors) => create_errors.get(key).cloned(),
                Err(error) => {
                    cell.cell.fail(error.clone());
                    return;
                }
            },
            _ => errors.get(key).cloned(),
        };
        if let Some(error) = error {
            failed.insert(key.clone(), error);
        }
    }

    if failed.is_empty() {
        cell.cell.complete(());
    } else {
        cell.cell.fail(TaskError::from_entity_errors(failed));
    }
}

fn single_error(error: EntityError) -> TaskError {
    let mut errors = KeyErrors::new();
    errors.insert(error.key.clone(), error);
    TaskError::from_entity_errors(errors)
}

fn unexpected(result: Option<&TaskResult>, index: usize) -> TaskError {
    match result {
        Some(result) => result.task_error().unwrap_or_else(|| {
            TaskError::invalid_operation(format!("unexpected result for task {index}"))
        }),
        None => TaskError::invalid_operation(format!("missing result for task {index}")),
    }
}
