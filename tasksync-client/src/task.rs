//! Deferred task handles.
//!
//! Every handle shares a [`TaskCell`] with the scheduler that emits it.
//! A cell starts `Pending` and moves exactly once to `Synced` or
//! `Failed`; later completions are ignored.

use crate::error::TaskAccessError;
use crate::reference::{ParentInfo, ReadRefTask, ReadRefsTask, RefSlots};
use crate::EntitySet;
use parking_lot::Mutex;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tasksync_model::{Entity, Filter};
use tasksync_protocol::EntityPatch;
use tasksync_types::{TaskError, TaskId};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Synced,
    Failed,
}

/// Id, label and outcome of one task after a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub id: TaskId,
    pub label: String,
    pub error: Option<TaskError>,
}

enum Outcome<R> {
    Pending,
    Synced(R),
    Failed(TaskError),
}

pub(crate) struct TaskCell<R> {
    id: TaskId,
    label: String,
    outcome: Mutex<Outcome<R>>,
}

impl<R: Clone> TaskCell<R> {
    pub(crate) fn new(id: TaskId, label: String) -> Self {
        Self {
            id,
            label,
            outcome: Mutex::new(Outcome::Pending),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn state(&self) -> TaskState {
        match &*self.outcome.lock() {
            Outcome::Pending => TaskState::Pending,
            Outcome::Synced(_) => TaskState::Synced,
            Outcome::Failed(_) => TaskState::Failed,
        }
    }

    pub(crate) fn complete(&self, value: R) {
        let mut outcome = self.outcome.lock();
        if matches!(*outcome, Outcome::Pending) {
            *outcome = Outcome::Synced(value);
        }
    }

    pub(crate) fn fail(&self, error: TaskError) {
        let mut outcome = self.outcome.lock();
        if matches!(*outcome, Outcome::Pending) {
            *outcome = Outcome::Failed(error);
        }
    }

    pub(crate) fn error(&self) -> Option<TaskError> {
        match &*self.outcome.lock() {
            Outcome::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    pub(crate) fn result(&self) -> Result<R, TaskAccessError> {
        match &*self.outcome.lock() {
            Outcome::Pending => Err(TaskAccessError::NotSynced {
                label: self.label.clone(),
            }),
            Outcome::Synced(value) => Ok(value.clone()),
            Outcome::Failed(error) => Err(TaskAccessError::Failed {
                label: self.label.clone(),
                error: error.clone(),
            }),
        }
    }

    pub(crate) fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            label: self.label.clone(),
            error: self.error(),
        }
    }

    pub(crate) fn parent_info(&self, many: bool) -> ParentInfo<'_> {
        ParentInfo {
            label: &self.label,
            state: self.state(),
            many,
        }
    }
}

macro_rules! task_accessors {
    () => {
        /// Task id. Ids order tasks by submission.
        pub fn id(&self) -> tasksync_types::TaskId {
            self.cell().id()
        }

        pub fn label(&self) -> &str {
            self.cell().label()
        }

        pub fn state(&self) -> $crate::TaskState {
            self.cell().state()
        }

        pub fn is_synced(&self) -> bool {
            self.cell().state() != $crate::TaskState::Pending
        }

        /// The error of a failed task.
        pub fn error(&self) -> Option<tasksync_types::TaskError> {
            self.cell().error()
        }
    };
}
pub(crate) use task_accessors;

pub(crate) fn key_label(keys: &[String]) -> String {
    match keys {
        [key] => format!("key: {key}"),
        keys => format!("keys: [{}]", keys.join(", ")),
    }
}

// ── Reads & queries ──────────────────────────────────────────────

pub(crate) struct ReadInner<T> {
    pub(crate) cell: TaskCell<Option<T>>,
    pub(crate) key: String,
    pub(crate) refs: RefSlots,
}

/// Reads one entity by key.
pub struct ReadTask<T: Entity> {
    inner: Arc<ReadInner<T>>,
}

impl<T: Entity> Clone for ReadTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> ReadTask<T> {
    pub(crate) fn new(id: TaskId, key: &str) -> Self {
        let label = format!("ReadTask ({}) key: {key}", T::CONTAINER);
        Self {
            inner: Arc::new(ReadInner {
                cell: TaskCell::new(id, label),
                key: key.to_string(),
                refs: RefSlots::default(),
            }),
        }
    }

    task_accessors!();

    fn cell(&self) -> &TaskCell<Option<T>> {
        &self.inner.cell
    }

    pub(crate) fn inner(&self) -> &ReadInner<T> {
        &self.inner
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The entity read, `None` when no entity has the key.
    pub fn result(&self) -> Result<Option<T>, TaskAccessError> {
        self.inner.cell.result()
    }

    /// Resolves a single reference of the read entity in `target`.
    pub fn read_ref<U: Entity>(
        &self,
        target: &EntitySet<U>,
        selector: &str,
    ) -> Result<ReadRefTask<U>, TaskAccessError> {
        self.inner
            .refs
            .add(self.inner.cell.parent_info(false), target, selector, false)
            .map(ReadRefTask::from_inner)
    }

    /// Resolves an array of references of the read entity in `target`.
    pub fn read_refs<U: Entity>(
        &self,
        target: &EntitySet<U>,
        selector: &str,
    ) -> Result<ReadRefsTask<U>, TaskAccessError> {
        self.inner
            .refs
            .add(self.inner.cell.parent_info(false), target, selector, true)
            .map(ReadRefsTask::from_inner)
    }

    /// Whether both handles refer to the same task.
    pub fn same_task(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

pub(crate) struct QueryInner<T> {
    pub(crate) cell: TaskCell<Vec<T>>,
    pub(crate) filter: Filter,
    pub(crate) fingerprint: String,
    pub(crate) keys: Mutex<Vec<String>>,
    pub(crate) refs: RefSlots,
}

/// Queries entities by filter.
pub struct QueryTask<T: Entity> {
    inner: Arc<QueryInner<T>>,
}

impl<T: Entity> Clone for QueryTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> QueryTask<T> {
    pub(crate) fn new(id: TaskId, filter: Filter) -> Self {
        let fingerprint = filter.fingerprint();
        let label = format!("QueryTask ({}) filter: {fingerprint}", T::CONTAINER);
        Self {
            inner: Arc::new(QueryInner {
                cell: TaskCell::new(id, label),
                filter,
                fingerprint,
                keys: Mutex::new(Vec::new()),
                refs: RefSlots::default(),
            }),
        }
    }

    task_accessors!();

    fn cell(&self) -> &TaskCell<Vec<T>> {
        &self.inner.cell
    }

    pub(crate) fn inner(&self) -> &QueryInner<T> {
        &self.inner
    }

    pub fn filter(&self) -> &Filter {
        &self.inner.filter
    }

    /// Matching entities in container order.
    pub fn result(&self) -> Result<Vec<T>, TaskAccessError> {
        self.inner.cell.result()
    }

    /// Keys of the matching entities.
    pub fn keys(&self) -> Result<Vec<String>, TaskAccessError> {
        self.inner.cell.result()?;
        Ok(self.inner.keys.lock().clone())
    }

    /// Resolves a reference of every matching entity in `target`. The
    /// union of all referenced keys must be exactly one key.
    pub fn read_ref<U: Entity>(
        &self,
        target: &EntitySet<U>,
        selector: &str,
    ) -> Result<ReadRefTask<U>, TaskAccessError> {
        self.inner
            .refs
            .add(self.inner.cell.parent_info(true), target, selector, false)
            .map(ReadRefTask::from_inner)
    }

    /// Resolves the references of every matching entity in `target`.
    pub fn read_refs<U: Entity>(
        &self,
        target: &EntitySet<U>,
        selector: &str,
    ) -> Result<ReadRefsTask<U>, TaskAccessError> {
        self.inner
            .refs
            .add(self.inner.cell.parent_info(true), target, selector, true)
            .map(ReadRefsTask::from_inner)
    }

    pub fn same_task(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ── Writes ───────────────────────────────────────────────────────

/// Shared state of a write task: its keys and outcome.
pub(crate) struct WriteCell {
    pub(crate) cell: TaskCell<()>,
    pub(crate) keys: Vec<String>,
    /// The task covers the whole container (delete all).
    pub(crate) all: bool,
}

impl WriteCell {
    pub(crate) fn new(id: TaskId, label: String, keys: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            cell: TaskCell::new(id, label),
            keys,
            all: false,
        })
    }

    pub(crate) fn whole_container(id: TaskId, label: String) -> Arc<Self> {
        Arc::new(Self {
            cell: TaskCell::new(id, label),
            keys: Vec::new(),
            all: true,
        })
    }
}

macro_rules! write_task {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<T: Entity> {
            inner: Arc<WriteCell>,
            _entity: PhantomData<fn() -> T>,
        }

        impl<T: Entity> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self::from_cell(Arc::clone(&self.inner))
            }
        }

        impl<T: Entity> $name<T> {
            pub(crate) fn from_cell(inner: Arc<WriteCell>) -> Self {
                Self {
                    inner,
                    _entity: PhantomData,
                }
            }

            task_accessors!();

            fn cell(&self) -> &TaskCell<()> {
                &self.inner.cell
            }

            /// Keys written by this task.
            pub fn keys(&self) -> &[String] {
                &self.inner.keys
            }

            pub fn result(&self) -> Result<(), TaskAccessError> {
                self.inner.cell.result()
            }
        }
    };
}

write_task!(
    /// Creates entities. An existing key fails that key only.
    CreateTask
);
write_task!(
    /// Creates or replaces entities.
    UpsertTask
);
write_task!(
    /// Sends the changes of tracked entities.
    PatchTask
);
write_task!(
    /// Deletes entities by key, or every entity of the container.
    DeleteTask
);

/// Patches found by one explicit change-detection pass.
pub struct DetectPatchesTask<T: Entity> {
    inner: Arc<WriteCell>,
    patches: Arc<Vec<EntityPatch>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for DetectPatchesTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            patches: Arc::clone(&self.patches),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> DetectPatchesTask<T> {
    pub(crate) fn new(inner: Arc<WriteCell>, patches: Vec<EntityPatch>) -> Self {
        Self {
            inner,
            patches: Arc::new(patches),
            _entity: PhantomData,
        }
    }

    task_accessors!();

    fn cell(&self) -> &TaskCell<()> {
        &self.inner.cell
    }

    /// Patches found by this pass, available before sync.
    pub fn patches(&self) -> &[EntityPatch] {
        &self.patches
    }

    pub fn result(&self) -> Result<(), TaskAccessError> {
        self.inner.cell.result()
    }
}

// ── Messages ─────────────────────────────────────────────────────

/// A named message handled by the host.
#[derive(Clone)]
pub struct MessageTask {
    pub(crate) cell: Arc<TaskCell<Value>>,
    name: String,
}

impl MessageTask {
    pub(crate) fn new(id: TaskId, name: &str) -> Self {
        Self {
            cell: Arc::new(TaskCell::new(id, format!("MessageTask {name}"))),
            name: name.to_string(),
        }
    }

    task_accessors!();

    fn cell(&self) -> &TaskCell<Value> {
        &self.cell
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value returned by the message handler.
    pub fn result(&self) -> Result<Value, TaskAccessError> {
        self.cell.result()
    }
}
