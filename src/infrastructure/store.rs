use crate::domain::models::{Task, TaskPatch};
use crate::infrastructure::error::EngineError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::watch;

/// One full-collection snapshot: an ordered mapping from task id to record.
/// Every update replaces the previous snapshot entirely; there is no
/// incremental diffing.
pub type TaskSnapshot = BTreeMap<String, Task>;

/// Handle for an owner-scoped snapshot stream. Dropping the handle tears the
/// subscription down; `latest` always yields the most recent snapshot pushed
/// by the store.
#[derive(Debug)]
pub struct SnapshotSubscription {
    receiver: watch::Receiver<TaskSnapshot>,
}

impl SnapshotSubscription {
    pub fn new(receiver: watch::Receiver<TaskSnapshot>) -> Self {
        Self { receiver }
    }

    pub fn latest(&self) -> TaskSnapshot {
        self.receiver.borrow().clone()
    }

    /// Waits for the next snapshot push. Returns `false` once the store side
    /// has gone away.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

/// The authoritative store's primitives over its keyed-tree data model
/// (`owner/tasks/{task_id}`). The engine owns no wire format of its own.
#[async_trait]
pub trait RemoteTaskStore: Send + Sync {
    /// Opens a continuous stream of full-collection snapshots scoped to the
    /// owner.
    fn subscribe(&self, owner_id: &str) -> Result<SnapshotSubscription, EngineError>;

    /// Requests a fresh task id from the store.
    async fn allocate_task_id(&self, owner_id: &str) -> Result<String, EngineError>;

    /// Writes a full record.
    async fn set_task(&self, owner_id: &str, task: &Task) -> Result<(), EngineError>;

    /// Merge-patches an existing record. Patching an unknown id is a no-op.
    async fn patch_task(
        &self,
        owner_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<(), EngineError>;

    /// Removes a record.
    async fn remove_task(&self, owner_id: &str, task_id: &str) -> Result<(), EngineError>;

    /// Atomic read-modify-write increment of the record's `actual_time`,
    /// retried to consistency inside the store. Returns the post-transaction
    /// value when the store exposes one; `None` when it does not (or the
    /// record is unknown), in which case the caller falls back to its cached
    /// snapshot.
    async fn increment_actual_time(
        &self,
        owner_id: &str,
        task_id: &str,
        delta: u32,
    ) -> Result<Option<u32>, EngineError>;
}
