//! Entity sets and their peer registries.
//!
//! One [`EntitySet`] exists per container and client. It owns the peer
//! registry (key → [`PeerEntity`]), which outlives sync cycles, and the
//! pending task maps of the next cycle.
//!
//! Lock order: `pending` before `peers`.

use crate::error::{ClientError, ClientResult};
use crate::peer::{PeerEntity, PeerInfo};
use crate::set_sync::{CycleTasks, EntitySetSync, SetCycle};
use crate::task::{
    key_label, CreateTask, DeleteTask, DetectPatchesTask, PatchTask, QueryTask, ReadTask,
    UpsertTask, WriteCell,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};
use tasksync_model::{from_value, to_value, Entity, Filter, ModelError, PeerHandle, Ref};
use tasksync_types::TaskId;
use tracing::{debug, warn};

type Peers<T> = HashMap<String, PeerEntity<T>>;

pub(crate) struct SetInner<T: Entity> {
    ids: Arc<AtomicU64>,
    pub(crate) peers: Mutex<Peers<T>>,
    pub(crate) pending: Mutex<EntitySetSync<T>>,
}

impl<T: Entity> PeerHandle<T> for SetInner<T> {
    fn assigned_entity(&self, key: &str) -> Option<T> {
        let peers = self.peers.lock();
        peers
            .get(key)
            .filter(|peer| peer.assigned)
            .map(|peer| peer.entity.clone())
    }
}

/// Weak handle to a set's peer registry, held by bound references of
/// fetched entities so that sets referencing each other do not leak.
struct WeakPeers<T: Entity>(Weak<SetInner<T>>);

impl<T: Entity> PeerHandle<T> for WeakPeers<T> {
    fn assigned_entity(&self, key: &str) -> Option<T> {
        self.0.upgrade()?.assigned_entity(key)
    }
}

/// Peer handles of every set of a client, by container.
pub(crate) struct RefBinder {
    handles: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl RefBinder {
    pub(crate) fn new(sets: &[Arc<dyn ErasedSet>]) -> Self {
        let handles = sets
            .iter()
            .map(|set| (set.container(), Arc::clone(set).peer_handle()))
            .collect();
        Self { handles }
    }

    /// Binds the key-only `Ref` fields of `entity` whose container has a
    /// set.
    pub(crate) fn bind<T: Entity>(&self, entity: &mut T) {
        entity.visit_refs_mut(&mut |field| {
            if let Some(handle) = self.handles.get(field.container()) {
                field.bind_peer(&**handle);
            }
        });
    }
}

/// A new entity embedded in another entity through a `Ref` field.
pub(crate) struct EmbeddedRef {
    pub(crate) container: &'static str,
    pub(crate) key: String,
    pub(crate) value: Value,
}

fn embedded_refs_of<T: Entity>(entity: &T) -> Vec<EmbeddedRef> {
    let mut found = Vec::new();
    entity.visit_refs(&mut |field| {
        let (Some(key), Some(value)) = (field.ref_key(), field.embedded_value()) else {
            return;
        };
        match value {
            Ok(value) => found.push(EmbeddedRef {
                container: field.container(),
                key: key.to_string(),
                value,
            }),
            Err(e) => debug!("Skipping embedded {} [{}]: {}", field.container(), key, e),
        }
    });
    found
}

/// Type-erased entity set, as held by the client.
pub(crate) trait ErasedSet: Send + Sync {
    fn container(&self) -> &'static str;

    /// New entities embedded in pending creates and upserts.
    fn embedded_refs(&self) -> Vec<EmbeddedRef>;

    /// Creates an embedded entity unless its key is already synced or
    /// being created. Returns the entities embedded in turn.
    fn create_embedded(&self, key: &str, value: Value) -> Vec<EmbeddedRef>;

    /// Runs lazy change detection and takes the pending tasks.
    fn begin_cycle(self: Arc<Self>) -> Box<dyn CycleTasks>;

    /// An `Arc<dyn PeerHandle<T>>` of this set, boxed for
    /// `RefField::bind_peer`.
    fn peer_handle(self: Arc<Self>) -> Box<dyn Any + Send + Sync>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Entity> SetInner<T> {
    fn next_task_id(&self) -> TaskId {
        TaskId::next(&self.ids)
    }

    /// Registers creates for `entities`, which must carry `keys`.
    fn stage_creates(
        &self,
        pending: &mut EntitySetSync<T>,
        peers: &mut Peers<T>,
        keys: Vec<String>,
        entities: Vec<T>,
    ) -> Arc<WriteCell> {
        let label = format!("CreateTask ({}) {}", T::CONTAINER, key_label(&keys));
        let cell = WriteCell::new(self.next_task_id(), label, keys.clone());
        for (key, entity) in keys.iter().zip(entities) {
            let peer = peers
                .entry(key.clone())
                .or_insert_with(|| PeerEntity::unassigned(key));
            peer.entity = entity;
            peer.assigned = true;
            peer.create_task = Some(cell.cell.id());
            pending.unstage_patch(Some(peer), key);
            pending.creates.insert(key.clone());
        }
        pending.create_tasks.push(Arc::clone(&cell));
        cell
    }
}

impl<T: Entity> ErasedSet for SetInner<T> {
    fn container(&self) -> &'static str {
        T::CONTAINER
    }

    fn embedded_refs(&self) -> Vec<EmbeddedRef> {
        let pending = self.pending.lock();
        let peers = self.peers.lock();
        pending
            .creates
            .iter()
            .chain(&pending.upserts)
            .filter_map(|key| peers.get(key))
            .flat_map(|peer| embedded_refs_of(&peer.entity))
            .collect()
    }

    fn create_embedded(&self, key: &str, value: Value) -> Vec<EmbeddedRef> {
        let mut pending = self.pending.lock();
        let mut peers = self.peers.lock();
        let known = peers
            .get(key)
            .is_some_and(|peer| peer.snapshot.is_some() || peer.create_task.is_some());
        if known || pending.creates.contains(key) || pending.upserts.contains(key) {
            return Vec::new();
        }
        let entity = match from_value::<T>(value) {
            Ok(entity) => entity,
            Err(e) => {
                warn!("Embedded {} [{}] is not a valid entity: {}", T::CONTAINER, key, e);
                return Vec::new();
            }
        };
        debug!("Creating embedded {} [{}]", T::CONTAINER, key);
        let embedded = embedded_refs_of(&entity);
        self.stage_creates(&mut pending, &mut peers, vec![key.to_string()], vec![entity]);
        embedded
    }

    fn begin_cycle(self: Arc<Self>) -> Box<dyn CycleTasks> {
        let sync = {
            let mut pending = self.pending.lock();
            let mut peers = self.peers.lock();
            let keys = std::mem::take(&mut pending.patch_keys);
            for key in keys {
                if let Some(peer) = peers.get_mut(&key) {
                    pending.detect(peer);
                }
            }
            std::mem::take(&mut *pending)
        };
        Box::new(SetCycle::new(self, sync))
    }

    fn peer_handle(self: Arc<Self>) -> Box<dyn Any + Send + Sync> {
        let handle: Arc<dyn PeerHandle<T>> = Arc::new(WeakPeers(Arc::downgrade(&self)));
        Box::new(handle)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// The tasks and tracked entities of one container.
pub struct EntitySet<T: Entity> {
    inner: Arc<SetInner<T>>,
}

impl<T: Entity> Clone for EntitySet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> EntitySet<T> {
    pub(crate) fn new(ids: Arc<AtomicU64>) -> Self {
        Self {
            inner: Arc::new(SetInner {
                ids,
                peers: Mutex::new(HashMap::new()),
                pending: Mutex::new(EntitySetSync::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SetInner<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<SetInner<T>> {
        &self.inner
    }

    pub(crate) fn next_task_id(&self) -> TaskId {
        self.inner.next_task_id()
    }

    pub fn container(&self) -> &'static str {
        T::CONTAINER
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Reads `key`. Reading the same key again before sync returns the
    /// same task.
    pub fn read(&self, key: &str) -> ReadTask<T> {
        let mut pending = self.inner.pending.lock();
        if let Some(task) = pending.reads.get(key) {
            return task.clone();
        }
        let task = ReadTask::new(self.next_task_id(), key);
        let mut peers = self.inner.peers.lock();
        peers
            .entry(key.to_string())
            .or_insert_with(|| PeerEntity::unassigned(key))
            .read_task = Some(task.id());
        pending.reads.insert(key.to_string(), task.clone());
        task
    }

    /// Queries by `filter`. Filters with the same fingerprint share one
    /// task until sync.
    pub fn query(&self, filter: Filter) -> QueryTask<T> {
        let mut pending = self.inner.pending.lock();
        let fingerprint = filter.fingerprint();
        if let Some(task) = pending
            .queries
            .iter()
            .find(|q| q.inner().fingerprint == fingerprint)
        {
            return task.clone();
        }
        let task = QueryTask::new(self.next_task_id(), filter);
        pending.queries.push(task.clone());
        task
    }

    // ── Writes ───────────────────────────────────────────────────

    pub fn create(&self, entity: T) -> ClientResult<CreateTask<T>> {
        self.create_range(vec![entity])
    }

    /// Creates `entities`. They become visible locally right away.
    ///
    /// A key already tracked with different content is a conflict; no
    /// entity is registered then.
    pub fn create_range(&self, entities: Vec<T>) -> ClientResult<CreateTask<T>> {
        let keys = entity_keys(&entities)?;
        let mut pending = self.inner.pending.lock();
        let mut peers = self.inner.peers.lock();
        for (key, entity) in keys.iter().zip(&entities) {
            if let Some(peer) = peers.get(key) {
                if peer.assigned && to_value(&peer.entity)? != to_value(entity)? {
                    return Err(ClientError::KeyConflict {
                        container: T::CONTAINER.to_string(),
                        key: key.clone(),
                    });
                }
            }
        }
        let cell = self
            .inner
            .stage_creates(&mut pending, &mut peers, keys, entities);
        Ok(CreateTask::from_cell(cell))
    }

    pub fn upsert(&self, entity: T) -> ClientResult<UpsertTask<T>> {
        self.upsert_range(vec![entity])
    }

    /// Creates or replaces `entities`.
    pub fn upsert_range(&self, entities: Vec<T>) -> ClientResult<UpsertTask<T>> {
        let keys = entity_keys(&entities)?;
        let mut pending = self.inner.pending.lock();
        let mut peers = self.inner.peers.lock();
        let label = format!("UpsertTask ({}) {}", T::CONTAINER, key_label(&keys));
        let cell = WriteCell::new(self.next_task_id(), label, keys.clone());
        for (key, entity) in keys.iter().zip(entities) {
            let peer = peers
                .entry(key.clone())
                .or_insert_with(|| PeerEntity::unassigned(key));
            peer.entity = entity;
            peer.assigned = true;
            pending.upserts.insert(key.clone());
        }
        pending.upsert_tasks.push(Arc::clone(&cell));
        Ok(UpsertTask::from_cell(cell))
    }

    /// Replaces the tracked entity and sends its changes at sync. The
    /// diff is computed when the sync is emitted.
    pub fn patch(&self, entity: T) -> ClientResult<PatchTask<T>> {
        let key = entity_key(&entity)?;
        let mut pending = self.inner.pending.lock();
        let mut peers = self.inner.peers.lock();
        let peer = peers
            .get_mut(&key)
            .filter(|peer| peer.assigned)
            .ok_or_else(|| not_tracked::<T>(&key))?;
        peer.entity = entity;
        pending.patch_keys.insert(key.clone());
        let label = format!("PatchTask ({}) key: {key}", T::CONTAINER);
        let cell = WriteCell::new(self.next_task_id(), label, vec![key]);
        pending.patch_tasks.push(Arc::clone(&cell));
        Ok(PatchTask::from_cell(cell))
    }

    /// Applies `f` to a copy of the tracked entity and patches it.
    pub fn modify(&self, key: &str, f: impl FnOnce(&mut T)) -> ClientResult<PatchTask<T>> {
        let mut entity = self.get(key).ok_or_else(|| not_tracked::<T>(key))?;
        f(&mut entity);
        if entity.key() != Some(key) {
            return Err(ModelError::KeyConflict {
                container: T::CONTAINER.to_string(),
                existing: key.to_string(),
                key: entity.key().unwrap_or_default().to_string(),
            }
            .into());
        }
        self.patch(entity)
    }

    /// Detects changes of every tracked entity now and stages them as
    /// patches. A second call without intervening changes finds nothing.
    pub fn detect_patches(&self) -> DetectPatchesTask<T> {
        let mut pending = self.inner.pending.lock();
        let mut peers = self.inner.peers.lock();
        let mut keys: Vec<String> = peers.keys().cloned().collect();
        keys.sort();

        let mut patches = Vec::new();
        for key in &keys {
            if let Some(peer) = peers.get_mut(key) {
                if let Some(patch) = pending.detect(peer) {
                    patches.push(patch);
                }
            }
        }
        let patched: Vec<String> = patches.iter().map(|p| p.key.clone()).collect();
        let label = format!("DetectPatchesTask ({}) patches: {}", T::CONTAINER, patched.len());
        let cell = WriteCell::new(self.next_task_id(), label, patched);
        pending.patch_tasks.push(Arc::clone(&cell));
        DetectPatchesTask::new(cell, patches)
    }

    pub fn delete(&self, key: &str) -> DeleteTask<T> {
        self.delete_range(vec![key.to_string()])
    }

    pub fn delete_range(&self, keys: Vec<String>) -> DeleteTask<T> {
        let mut pending = self.inner.pending.lock();
        let mut peers = self.inner.peers.lock();
        for key in &keys {
            pending.unstage_patch(peers.get_mut(key), key);
            pending.deletes.insert(key.clone());
        }
        let label = format!("DeleteTask ({}) {}", T::CONTAINER, key_label(&keys));
        let cell = WriteCell::new(self.next_task_id(), label, keys);
        pending.delete_tasks.push(Arc::clone(&cell));
        DeleteTask::from_cell(cell)
    }

    /// Deletes every entity of the container.
    pub fn delete_all(&self) -> DeleteTask<T> {
        let mut pending = self.inner.pending.lock();
        pending.delete_all = true;
        let label = format!("DeleteTask ({}) all", T::CONTAINER);
        let cell = WriteCell::whole_container(self.next_task_id(), label);
        pending.delete_tasks.push(Arc::clone(&cell));
        DeleteTask::from_cell(cell)
    }

    // ── Peers ────────────────────────────────────────────────────

    /// The tracked entity of `key`, if data is bound to it.
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.assigned_entity(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .peers
            .lock()
            .get(key)
            .is_some_and(|peer| peer.assigned)
    }

    pub fn peer_info(&self, key: &str) -> Option<PeerInfo> {
        self.inner.peers.lock().get(key).map(PeerEntity::info)
    }

    /// Number of peers, assigned or not.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    /// Binds `reference` to this set's peer registry. Unset references
    /// are left alone.
    pub fn attach_ref(&self, reference: &mut Ref<T>) {
        let Some(key) = reference.key().map(str::to_string) else {
            return;
        };
        self.inner
            .peers
            .lock()
            .entry(key.clone())
            .or_insert_with(|| PeerEntity::unassigned(&key));
        let handle: Arc<dyn PeerHandle<T>> = self.inner.clone();
        *reference = Ref::bound(key, handle);
    }
}

fn entity_key<T: Entity>(entity: &T) -> ClientResult<String> {
    entity
        .key()
        .map(str::to_string)
        .ok_or_else(|| {
            ModelError::MissingKey {
                container: T::CONTAINER.to_string(),
            }
            .into()
        })
}

fn entity_keys<T: Entity>(entities: &[T]) -> ClientResult<Vec<String>> {
    entities.iter().map(entity_key).collect()
}

fn not_tracked<T: Entity>(key: &str) -> ClientError {
    ClientError::NotTracked {
        container: T::CONTAINER.to_string(),
        key: key.to_string(),
    }
}
