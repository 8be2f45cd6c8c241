use crate::domain::models::{Task, TaskPatch};
use crate::infrastructure::error::EngineError;
use crate::infrastructure::store::{RemoteTaskStore, SnapshotSubscription, TaskSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug)]
struct OwnerShard {
    tasks: TaskSnapshot,
    publisher: watch::Sender<TaskSnapshot>,
}

impl OwnerShard {
    fn new() -> Self {
        let (publisher, _) = watch::channel(TaskSnapshot::new());
        Self {
            tasks: TaskSnapshot::new(),
            publisher,
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.tasks.clone());
    }
}

/// Reference store: one mutex guards each owner's whole shard, so the
/// read-modify-write increment is atomic against every other writer, and each
/// mutation publishes a full replacement snapshot over the watch channel.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    owners: Mutex<HashMap<String, OwnerShard>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_owners(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, OwnerShard>>, EngineError> {
        self.owners
            .lock()
            .map_err(|error| EngineError::Store(format!("store lock poisoned: {error}")))
    }
}

#[async_trait]
impl RemoteTaskStore for InMemoryTaskStore {
    fn subscribe(&self, owner_id: &str) -> Result<SnapshotSubscription, EngineError> {
        let mut owners = self.lock_owners()?;
        let shard = owners
            .entry(owner_id.to_string())
            .or_insert_with(OwnerShard::new);
        Ok(SnapshotSubscription::new(shard.publisher.subscribe()))
    }

    async fn allocate_task_id(&self, _owner_id: &str) -> Result<String, EngineError> {
        Ok(next_id("tsk"))
    }

    async fn set_task(&self, owner_id: &str, task: &Task) -> Result<(), EngineError> {
        let mut owners = self.lock_owners()?;
        let shard = owners
            .entry(owner_id.to_string())
            .or_insert_with(OwnerShard::new);
        shard.tasks.insert(task.id.clone(), task.clone());
        shard.publish();
        Ok(())
    }

    async fn patch_task(
        &self,
        owner_id: &str,
        task_id: &str,
        patch: &TaskPatch,
    ) -> Result<(), EngineError> {
        let mut owners = self.lock_owners()?;
        let Some(shard) = owners.get_mut(owner_id) else {
            return Ok(());
        };
        let Some(task) = shard.tasks.get_mut(task_id) else {
            return Ok(());
        };
        patch.apply(task);
        shard.publish();
        Ok(())
    }

    async fn remove_task(&self, owner_id: &str, task_id: &str) -> Result<(), EngineError> {
        let mut owners = self.lock_owners()?;
        let Some(shard) = owners.get_mut(owner_id) else {
            return Ok(());
        };
        if shard.tasks.remove(task_id).is_some() {
            shard.publish();
        }
        Ok(())
    }

    async fn increment_actual_time(
        &self,
        owner_id: &str,
        task_id: &str,
        delta: u32,
    ) -> Result<Option<u32>, EngineError> {
        let mut owners = self.lock_owners()?;
        let Some(shard) = owners.get_mut(owner_id) else {
            return Ok(None);
        };
        let Some(task) = shard.tasks.get_mut(task_id) else {
            return Ok(None);
        };
        task.actual_time = task.actual_time.saturating_add(delta);
        let committed = task.actual_time;
        shard.publish();
        Ok(Some(committed))
    }
}
