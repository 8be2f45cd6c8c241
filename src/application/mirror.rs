use crate::domain::models::Task;
use crate::infrastructure::store::{SnapshotSubscription, TaskSnapshot};

/// Local read replica of the owner-scoped task collection. Each store push
/// replaces the whole set; the mirror never diffs. Detaching (owner loss)
/// drops the subscription and empties the replica synchronously.
#[derive(Debug, Default)]
pub struct TaskMirror {
    subscription: Option<SnapshotSubscription>,
}

impl TaskMirror {
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, subscription: SnapshotSubscription) {
        self.subscription = Some(subscription);
    }

    pub fn clear(&mut self) {
        self.subscription = None;
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.subscription
            .as_ref()
            .map(SnapshotSubscription::latest)
            .unwrap_or_default()
    }

    /// Read-only ordered sequence of the replica (ordered by task id).
    pub fn tasks(&self) -> Vec<Task> {
        self.snapshot().into_values().collect()
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.subscription
            .as_ref()
            .and_then(|subscription| subscription.latest().get(task_id).cloned())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.get(task_id).is_some()
    }
}
