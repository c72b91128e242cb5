//! Peer registry entries.

use serde_json::Value;
use tasksync_model::{diff_values, to_value, Entity, ModelResult};
use tasksync_protocol::EntityPatch;
use tasksync_types::TaskId;

/// Registry entry binding a key to its live entity, the snapshot of its
/// last synced state and the tasks outstanding for it.
pub(crate) struct PeerEntity<T> {
    pub(crate) key: String,
    pub(crate) entity: T,
    /// Set once a create, read or query bound real data to the peer.
    pub(crate) assigned: bool,
    /// Last synced state, the diff baseline.
    pub(crate) snapshot: Option<Value>,
    /// State sent by an in-flight patch; promoted on success.
    pub(crate) pending_snapshot: Option<Value>,
    pub(crate) read_task: Option<TaskId>,
    pub(crate) create_task: Option<TaskId>,
}

impl<T: Entity> PeerEntity<T> {
    /// An unassigned peer holding a default entity carrying `key`.
    pub(crate) fn unassigned(key: &str) -> Self {
        let mut entity = T::default();
        entity.set_key(key);
        Self::with_entity(key, entity)
    }

    pub(crate) fn with_entity(key: &str, entity: T) -> Self {
        Self {
            key: key.to_string(),
            entity,
            assigned: false,
            snapshot: None,
            pending_snapshot: None,
            read_task: None,
            create_task: None,
        }
    }

    /// Binds synced data: live entity and snapshot both take `value`.
    pub(crate) fn assign_synced(&mut self, entity: T, value: Value) {
        self.entity = entity;
        self.assigned = true;
        self.snapshot = Some(value);
        self.pending_snapshot = None;
    }

    /// Compares the live entity against its baseline.
    ///
    /// The baseline is the pending snapshot if a patch is in flight, else
    /// the snapshot. Returns the members changed since the confirmed
    /// snapshot together with the live value, or `None` when nothing
    /// changed since the baseline. Peers without a snapshot never patch.
    pub(crate) fn detect_change(&mut self) -> ModelResult<Option<(EntityPatch, Value)>> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(None);
        };
        let live = to_value(&self.entity)?;
        let baseline = self.pending_snapshot.as_ref().unwrap_or(snapshot);
        if live == *baseline {
            return Ok(None);
        }
        let mut members = diff_values(snapshot, &live);
        if members.is_empty() {
            // Reverted to the confirmed state while a patch is in flight.
            members = diff_values(baseline, &live);
        }
        self.pending_snapshot = Some(live.clone());
        Ok(Some((EntityPatch::new(self.key.clone(), members), live)))
    }

    pub(crate) fn info(&self) -> PeerInfo {
        PeerInfo {
            key: self.key.clone(),
            assigned: self.assigned,
            synced: self.snapshot.is_some(),
            patch_in_flight: self.pending_snapshot.is_some(),
            read_task: self.read_task,
            create_task: self.create_task,
        }
    }
}

/// Read-only view of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub key: String,
    /// Real data is bound to the peer.
    pub assigned: bool,
    /// The peer has a synced snapshot.
    pub synced: bool,
    /// A patch was emitted and is not yet confirmed.
    pub patch_in_flight: bool,
    pub read_task: Option<TaskId>,
    pub create_task: Option<TaskId>,
}
