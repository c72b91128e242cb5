//! Reference-resolution sub-tasks.
//!
//! A sub-task hangs off a Read, Query or another sub-task and resolves a
//! selector path on the parent's entities into entities of a target
//! container. Sub-tasks are keyed by `(selector, container, cardinality)`
//! per parent, so asking for the same reference twice returns the same
//! task. They are applied strictly after their parent.

use crate::entity_set::RefBinder;
use crate::error::TaskAccessError;
use crate::task::{task_accessors, TaskCell, TaskState, TaskSummary};
use crate::EntitySet;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tasksync_model::{from_value, Entity, Selector};
use tasksync_protocol::{EntityValue, ReferenceSelector, ReferencesResult, SyncResponse};
use tasksync_types::{EntityError, TaskError};
use tracing::debug;

/// What a sub-task needs to know about its parent when it is attached.
pub(crate) struct ParentInfo<'a> {
    pub(crate) label: &'a str,
    pub(crate) state: TaskState,
    /// The parent yields more than one entity.
    pub(crate) many: bool,
}

/// Type-erased sub-task.
pub(crate) trait SubRef: Send + Sync {
    fn path(&self) -> &str;

    fn container(&self) -> &'static str;

    fn is_many(&self) -> bool;

    /// The wire selector, including nested selectors. Freezes the
    /// sub-task's own slots.
    fn selector(&self) -> ReferenceSelector;

    fn apply(
        &self,
        parent_keys: &[String],
        results: &[ReferencesResult],
        response: &SyncResponse,
        binder: &RefBinder,
    );

    fn fail(&self, error: &TaskError);

    fn collect(&self, out: &mut Vec<TaskSummary>);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[derive(Default)]
struct SlotState {
    slots: Vec<Arc<dyn SubRef>>,
    frozen: bool,
}

/// Sub-tasks attached to one parent task.
#[derive(Default)]
pub(crate) struct RefSlots {
    state: Mutex<SlotState>,
}

impl RefSlots {
    /// Returns the sub-task for `path` in `target`, creating it if absent.
    pub(crate) fn add<U: Entity>(
        &self,
        parent: ParentInfo<'_>,
        target: &EntitySet<U>,
        path: &str,
        many: bool,
    ) -> Result<Arc<RefTaskInner<U>>, TaskAccessError> {
        let invalid = |reason: String| TaskAccessError::InvalidSelector {
            label: parent.label.to_string(),
            reason,
        };
        let selector = Selector::parse(path).map_err(|e| invalid(e.to_string()))?;
        if many && !(selector.is_many() || parent.many) {
            return Err(invalid(format!(
                "'{path}' references a single entity, use read_ref"
            )));
        }
        if !many && selector.is_many() {
            return Err(invalid(format!(
                "'{path}' references an array, use read_refs"
            )));
        }

        let mut state = self.state.lock();
        if parent.state != TaskState::Pending || state.frozen {
            return Err(TaskAccessError::AlreadySynced {
                label: parent.label.to_string(),
            });
        }

        for slot in &state.slots {
            if slot.path() == selector.path()
                && slot.container() == U::CONTAINER
                && slot.is_many() == many
            {
                if let Ok(existing) = Arc::clone(slot).into_any().downcast::<RefTaskInner<U>>() {
                    return Ok(existing);
                }
            }
        }

        let kind = if many { "ReadRefs" } else { "ReadRef" };
        let label = format!("{} -> {kind} .{}", parent.label, selector.path());
        let task = Arc::new(RefTaskInner::<U> {
            cell: TaskCell::new(target.next_task_id(), label),
            selector,
            many,
            keys: Mutex::new(Vec::new()),
            refs: RefSlots::default(),
        });
        state.slots.push(task.clone());
        Ok(task)
    }

    /// Wire selectors of all sub-tasks. No sub-task can be attached
    /// afterwards.
    pub(crate) fn freeze(&self) -> Vec<ReferenceSelector> {
        let slots = {
            let mut state = self.state.lock();
            state.frozen = true;
            state.slots.clone()
        };
        let mut selectors = Vec::new();
        for slot in slots {
            merge_selector(&mut selectors, slot.selector());
        }
        selectors
    }

    fn slots(&self) -> Vec<Arc<dyn SubRef>> {
        self.state.lock().slots.clone()
    }

    pub(crate) fn apply(
        &self,
        parent_keys: &[String],
        results: &[ReferencesResult],
        response: &SyncResponse,
        binder: &RefBinder,
    ) {
        for slot in self.slots() {
            slot.apply(parent_keys, results, response, binder);
        }
    }

    pub(crate) fn fail(&self, error: &TaskError) {
        for slot in self.slots() {
            slot.fail(error);
        }
    }

    pub(crate) fn collect(&self, out: &mut Vec<TaskSummary>) {
        for slot in self.slots() {
            slot.collect(out);
        }
    }
}

/// Adds `selector` to `into`, merging nested selectors of an equal
/// `(selector, container)` entry.
pub(crate) fn merge_selector(into: &mut Vec<ReferenceSelector>, selector: ReferenceSelector) {
    match into
        .iter_mut()
        .find(|s| s.selector == selector.selector && s.container == selector.container)
    {
        Some(existing) => {
            for nested in selector.references {
                merge_selector(&mut existing.references, nested);
            }
        }
        None => into.push(selector),
    }
}

pub(crate) struct RefTaskInner<U> {
    cell: TaskCell<Vec<U>>,
    selector: Selector,
    many: bool,
    keys: Mutex<Vec<String>>,
    refs: RefSlots,
}

impl<U: Entity> RefTaskInner<U> {
    fn fail_tree(&self, error: TaskError) {
        self.refs.fail(&error);
        self.cell.fail(error);
    }
}

impl<U: Entity> SubRef for RefTaskInner<U> {
    fn path(&self) -> &str {
        self.selector.path()
    }

    fn container(&self) -> &'static str {
        U::CONTAINER
    }

    fn is_many(&self) -> bool {
        self.many
    }

    fn selector(&self) -> ReferenceSelector {
        ReferenceSelector::new(self.selector.path(), U::CONTAINER)
            .with_references(self.refs.freeze())
    }

    fn apply(
        &self,
        parent_keys: &[String],
        results: &[ReferencesResult],
        response: &SyncResponse,
        binder: &RefBinder,
    ) {
        let path = self.selector.path();
        let Some(result) = results
            .iter()
            .find(|r| r.selector == path && r.container == U::CONTAINER)
        else {
            self.fail_tree(TaskError::invalid_operation(format!(
                "missing reference result for .{path}"
            )));
            return;
        };
        if let Some(error) = &result.error {
            self.fail_tree(TaskError::database(error.clone()));
            return;
        }

        let mut keys: Vec<String> = Vec::new();
        for parent in parent_keys {
            for key in result.parents.get(parent).into_iter().flatten() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        if !self.many && keys.len() != 1 {
            debug!("{}: resolved {} keys", self.cell.label(), keys.len());
            self.fail_tree(TaskError::invalid_operation(format!(
                "ReadRef .{path} resolved {} keys, expected exactly one",
                keys.len()
            )));
            return;
        }

        let mut entities = Vec::with_capacity(keys.len());
        let mut found = Vec::with_capacity(keys.len());
        let mut errors = BTreeMap::new();
        for key in &keys {
            match response.entity(U::CONTAINER, key) {
                Some(EntityValue {
                    value: Some(value), ..
                }) => match from_value::<U>(value.clone()) {
                    Ok(mut entity) => {
                        binder.bind(&mut entity);
                        entities.push(entity);
                        found.push(key.clone());
                    }
                    Err(e) => {
                        errors.insert(
                            key.clone(),
                            EntityError::parse(U::CONTAINER, key, e.to_string()),
                        );
                    }
                },
                Some(EntityValue {
                    error: Some(error), ..
                }) => {
                    errors.insert(key.clone(), error.clone());
                }
                // A missing target only fails a single reference.
                _ if !self.many => {
                    errors.insert(
                        key.clone(),
                        EntityError::read(U::CONTAINER, key, "referenced entity not found"),
                    );
                }
                _ => {}
            }
        }

        if !errors.is_empty() {
            self.fail_tree(TaskError::from_entity_errors(errors));
            return;
        }
        *self.keys.lock() = found.clone();
        self.cell.complete(entities);
        self.refs.apply(&found, &result.references, response, binder);
    }

    fn fail(&self, error: &TaskError) {
        self.fail_tree(error.clone());
    }

    fn collect(&self, out: &mut Vec<TaskSummary>) {
        out.push(self.cell.summary());
        self.refs.collect(out);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Resolves a single reference into one entity.
pub struct ReadRefTask<U: Entity> {
    inner: Arc<RefTaskInner<U>>,
}

impl<U: Entity> Clone for ReadRefTask<U> {
    fn clone(&self) -> Self {
        Self::from_inner(Arc::clone(&self.inner))
    }
}

impl<U: Entity> ReadRefTask<U> {
    pub(crate) fn from_inner(inner: Arc<RefTaskInner<U>>) -> Self {
        Self { inner }
    }

    task_accessors!();

    fn cell(&self) -> &TaskCell<Vec<U>> {
        &self.inner.cell
    }

    pub fn selector(&self) -> &str {
        self.inner.selector.path()
    }

    /// Key of the referenced entity once synced.
    pub fn key(&self) -> Option<String> {
        self.inner.keys.lock().first().cloned()
    }

    /// The referenced entity.
    pub fn result(&self) -> Result<U, TaskAccessError> {
        self.inner
            .cell
            .result()?
            .into_iter()
            .next()
            .ok_or_else(|| TaskAccessError::Failed {
                label: self.inner.cell.label().to_string(),
                error: TaskError::invalid_operation("no entity resolved"),
            })
    }

    pub fn read_ref<V: Entity>(
        &self,
        target: &EntitySet<V>,
        selector: &str,
    ) -> Result<ReadRefTask<V>, TaskAccessError> {
        self.inner
            .refs
            .add(self.inner.cell.parent_info(false), target, selector, false)
            .map(ReadRefTask::from_inner)
    }

    pub fn read_refs<V: Entity>(
        &self,
        target: &EntitySet<V>,
        selector: &str,
    ) -> Result<ReadRefsTask<V>, TaskAccessError> {
        self.inner
            .refs
            .add(self.inner.cell.parent_info(false), target, selector, true)
            .map(ReadRefsTask::from_inner)
    }

    pub fn same_task(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Resolves references into a set of entities. Missing targets are
/// skipped.
pub struct ReadRefsTask<U: Entity> {
    inner: Arc<RefTaskInner<U>>,
}

impl<U: Entity> Clone for ReadRefsTask<U> {
    fn clone(&self) -> Self {
        Self::from_inner(Arc::clone(&self.inner))
    }
}

impl<U: Entity> ReadRefsTask<U> {
    pub(crate) fn from_inner(inner: Arc<RefTaskInner<U>>) -> Self {
        Self { inner }
    }

    task_accessors!();

    fn cell(&self) -> &TaskCell<Vec<U>> {
        &self.inner.cell
    }

    pub fn selector(&self) -> &str {
        self.inner.selector.path()
    }

    /// Keys of the referenced entities that exist.
    pub fn keys(&self) -> Result<Vec<String>, TaskAccessError> {
        self.inner.cell.result()?;
        Ok(self.inner.keys.lock().clone())
    }

    pub fn result(&self) -> Result<Vec<U>, TaskAccessError> {
        self.inner.cell.result()
    }

    pub fn read_ref<V: Entity>(
        &self,
        target: &EntitySet<V>,
        selector: &str,
    ) -> Result<ReadRefTask<V>, TaskAccessError> {
        self.inner
            .refs
            .add(self.inner.cell.parent_info(true), target, selector, false)
            .map(ReadRefTask::from_inner)
    }

    pub fn read_refs<V: Entity>(
        &self,
        target: &EntitySet<V>,
        selector: &str,
    ) -> Result<ReadRefsTask<V>, TaskAccessError> {
        self.inner
            .refs
            .add(self.inner.cell.parent_info(true), target, selector, true)
            .map(ReadRefsTask::from_inner)
    }

    pub fn same_task(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
