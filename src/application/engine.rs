use crate::application::mirror::TaskMirror;
use crate::application::session_log::{DaySummary, SessionLog};
use crate::application::timer::{Countdown, TimerMode};
use crate::domain::models::{
    StudySession, Task, TaskDraft, TaskPatch, TaskStatus, derive_progress,
};
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::error::EngineError;
use crate::infrastructure::store::RemoteTaskStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::MissedTickBehavior;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Snapshot of the timer session for UI consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerStateView {
    pub mode: TimerMode,
    pub remaining_seconds: u32,
    pub running: bool,
    pub active_task_id: Option<String>,
}

#[derive(Debug)]
struct RuntimeState {
    owner_id: Option<String>,
    mirror: TaskMirror,
    active_task_id: Option<String>,
    running: bool,
    countdown: Countdown,
    session_started_at: Option<DateTime<Utc>>,
    sessions: SessionLog,
}

impl RuntimeState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            owner_id: None,
            mirror: TaskMirror::detached(),
            active_task_id: None,
            running: false,
            countdown: Countdown::new(config.preset_duration_seconds),
            session_started_at: None,
            sessions: SessionLog::new(config.session_log_capacity),
        }
    }
}

/// Task lifecycle controller, timer session manager and reconciliation
/// protocol in one engine instance. All engine state sits behind one mutex;
/// the guard is never held across an await, so the tick loop, snapshot reads
/// and user operations interleave but never overlap.
pub struct StudyEngine<S: RemoteTaskStore> {
    store: Arc<S>,
    runtime: Mutex<RuntimeState>,
    now_provider: NowProvider,
}

impl<S: RemoteTaskStore> StudyEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            runtime: Mutex::new(RuntimeState::new(&config)),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn lock_runtime(&self) -> Result<MutexGuard<'_, RuntimeState>, EngineError> {
        self.runtime
            .lock()
            .map_err(|error| EngineError::Store(format!("runtime lock poisoned: {error}")))
    }

    /// Binds or clears the owner identity. Binding subscribes the mirror to
    /// the owner's collection; clearing tears the subscription down, empties
    /// the replica and resets the timer session synchronously. The session
    /// log is process-local and survives identity changes.
    pub fn set_identity(&self, owner_id: Option<&str>) -> Result<(), EngineError> {
        let normalized = owner_id.map(str::trim).filter(|value| !value.is_empty());
        match normalized {
            Some(owner) => {
                let subscription = self.store.subscribe(owner)?;
                let mut runtime = self.lock_runtime()?;
                runtime.mirror.attach(subscription);
                runtime.owner_id = Some(owner.to_string());
                tracing::info!(owner, "identity bound; mirror subscribed");
            }
            None => {
                let mut runtime = self.lock_runtime()?;
                runtime.mirror.clear();
                runtime.owner_id = None;
                runtime.active_task_id = None;
                runtime.running = false;
                runtime.session_started_at = None;
                runtime.countdown.rearm();
                tracing::info!("identity cleared; mirror torn down");
            }
        }
        Ok(())
    }

    fn current_owner(&self, operation: &str) -> Result<Option<String>, EngineError> {
        let runtime = self.lock_runtime()?;
        let owner = runtime.owner_id.clone();
        if owner.is_none() {
            // Writes without an owner are dropped, not raised, so logout
            // races never surface as errors.
            tracing::warn!(operation, "dropping write: no authenticated owner");
        }
        Ok(owner)
    }

    pub fn tasks(&self) -> Result<Vec<Task>, EngineError> {
        Ok(self.lock_runtime()?.mirror.tasks())
    }

    pub fn task(&self, task_id: &str) -> Result<Option<Task>, EngineError> {
        Ok(self.lock_runtime()?.mirror.get(task_id))
    }

    pub fn active_task_id(&self) -> Result<Option<String>, EngineError> {
        Ok(self.lock_runtime()?.active_task_id.clone())
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .map(|runtime| runtime.running)
            .unwrap_or(false)
    }

    pub fn timer_state(&self) -> Result<TimerStateView, EngineError> {
        let runtime = self.lock_runtime()?;
        Ok(TimerStateView {
            mode: runtime.countdown.mode(),
            remaining_seconds: runtime.countdown.remaining_seconds(),
            running: runtime.running,
            active_task_id: runtime.active_task_id.clone(),
        })
    }

    /// Switches countdown mode. Switching while running is a caller-enforced
    /// restriction; the engine only resets the displayed duration.
    pub fn set_timer_mode(&self, mode: TimerMode) -> Result<(), EngineError> {
        self.lock_runtime()?.countdown.set_mode(mode);
        Ok(())
    }

    pub fn configure_custom_timer(&self, minutes: u32, seconds: u32) -> Result<(), EngineError> {
        self.lock_runtime()?
            .countdown
            .configure_custom(minutes, seconds)
            .map_err(EngineError::Validation)
    }

    /// Creates a task. Title and subject must be non-empty; the new record is
    /// observed through the next mirror snapshot rather than returned.
    pub async fn add_task(&self, draft: TaskDraft) -> Result<(), EngineError> {
        draft.validate().map_err(EngineError::Validation)?;
        let Some(owner_id) = self.current_owner("add_task")? else {
            return Ok(());
        };

        let task_id = self.store.allocate_task_id(&owner_id).await?;
        let task = draft.into_task(task_id);
        self.store.set_task(&owner_id, &task).await?;
        tracing::info!(task_id = %task.id, "created task");
        Ok(())
    }

    /// Merge-patches a stored record. This path deliberately bypasses the
    /// status state machine; it is the escape hatch for manual corrections
    /// such as completing or reopening a task directly.
    pub async fn edit_task(&self, task_id: &str, patch: TaskPatch) -> Result<(), EngineError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(EngineError::Validation(
                "task id must not be empty".to_string(),
            ));
        }
        let Some(owner_id) = self.current_owner("edit_task")? else {
            return Ok(());
        };
        if patch.is_empty() {
            return Ok(());
        }

        self.store.patch_task(&owner_id, task_id, &patch).await?;
        tracing::info!(task_id, "patched task");
        Ok(())
    }

    /// Removes a record. Deleting the active task clears the binding and
    /// stops the timer.
    pub async fn delete_task(&self, task_id: &str) -> Result<(), EngineError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(EngineError::Validation(
                "task id must not be empty".to_string(),
            ));
        }
        let Some(owner_id) = self.current_owner("delete_task")? else {
            return Ok(());
        };

        self.store.remove_task(&owner_id, task_id).await?;

        let mut runtime = self.lock_runtime()?;
        if runtime.active_task_id.as_deref() == Some(task_id) {
            runtime.active_task_id = None;
            runtime.running = false;
            runtime.session_started_at = None;
            runtime.countdown.rearm();
        }
        drop(runtime);
        tracing::info!(task_id, "deleted task");
        Ok(())
    }

    /// Binds `task_id` active and starts the countdown, patching remote
    /// status to in-progress (idempotent when already in-progress). Unknown
    /// ids are a no-op. Beginning a new task while another is active does not
    /// stop or patch the previous one: its remote status stays in-progress
    /// with no timer backing it.
    pub async fn begin_task(&self, task_id: &str) -> Result<(), EngineError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(EngineError::Validation(
                "task id must not be empty".to_string(),
            ));
        }

        let owner_id = {
            let mut runtime = self.lock_runtime()?;
            if !runtime.mirror.contains(task_id) {
                tracing::warn!(task_id, "begin_task ignored: task not in mirror");
                return Ok(());
            }
            if runtime.active_task_id.as_deref() != Some(task_id) {
                runtime.active_task_id = Some(task_id.to_string());
                runtime.countdown.rearm();
                runtime.session_started_at = None;
            }
            runtime.running = true;
            if runtime.session_started_at.is_none() {
                runtime.session_started_at = Some((self.now_provider)());
            }
            runtime.owner_id.clone()
        };
        let Some(owner_id) = owner_id else {
            return Ok(());
        };

        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..TaskPatch::default()
        };
        self.store.patch_task(&owner_id, task_id, &patch).await?;
        tracing::info!(task_id, "task bound active and running");
        Ok(())
    }

    /// Ends the session for `task_id`: clears the running flag, clears the
    /// binding when it matches, and records a study session. Remote status is
    /// untouched; completion comes from reconciliation or an explicit edit.
    pub fn end_task(&self, task_id: &str) -> Result<(), EngineError> {
        let mut runtime = self.lock_runtime()?;
        runtime.running = false;
        if runtime.active_task_id.as_deref() == Some(task_id) {
            runtime.active_task_id = None;
            if let Some(started_at) = runtime.session_started_at.take() {
                if let Some(task) = runtime.mirror.get(task_id) {
                    let ended_at = (self.now_provider)();
                    let completed = task.progress >= 100;
                    runtime.sessions.record(StudySession {
                        id: next_id("ses"),
                        task_title: task.title,
                        subject: task.subject,
                        duration_minutes: (ended_at - started_at).num_minutes().max(0),
                        started_at,
                        ended_at,
                        completed,
                    });
                }
            }
        }
        drop(runtime);
        tracing::info!(task_id, "study session ended");
        Ok(())
    }

    /// Pause: clears only the running flag. The binding and countdown stay,
    /// so the session is resumable.
    pub fn stop_task(&self) -> Result<(), EngineError> {
        self.lock_runtime()?.running = false;
        tracing::info!("timer paused; active binding preserved");
        Ok(())
    }

    /// Starts the timer against an explicit task, or the already-active one
    /// when none is given. Having neither is a validation failure, never a
    /// silent no-op timer.
    pub async fn start_timer(&self, task_id: Option<&str>) -> Result<(), EngineError> {
        let explicit = task_id
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned);
        let selected = match explicit {
            Some(id) => Some(id),
            None => self.active_task_id()?,
        };
        let Some(selected) = selected else {
            return Err(EngineError::Validation("no task selected".to_string()));
        };
        self.begin_task(&selected).await
    }

    /// Direct progress/status patch for UI collaborators. Does not touch the
    /// active binding.
    pub async fn update_progress(
        &self,
        task_id: &str,
        progress: u8,
        completed: bool,
    ) -> Result<(), EngineError> {
        let Some(owner_id) = self.current_owner("update_progress")? else {
            return Ok(());
        };
        let patch = TaskPatch {
            progress: Some(progress.min(100)),
            status: Some(if completed {
                TaskStatus::Completed
            } else {
                TaskStatus::InProgress
            }),
            ..TaskPatch::default()
        };
        self.store.patch_task(&owner_id, task_id, &patch).await?;
        Ok(())
    }

    /// Reconciles one elapsed study-minute:
    /// 1. atomically increments the durable `actual_time` counter;
    /// 2. derives progress/status from the post-transaction value when the
    ///    store reports one, falling back to the cached snapshot plus one,
    ///    and writes the derived patch;
    /// 3. on reaching 100%, clears the active binding and stops the timer.
    /// Without a cached record the derived patch is skipped; the counter has
    /// still advanced and the fields catch up on a later tick or snapshot.
    pub async fn tick_minute(&self, task_id: &str) -> Result<(), EngineError> {
        let (owner_id, cached) = {
            let runtime = self.lock_runtime()?;
            (runtime.owner_id.clone(), runtime.mirror.get(task_id))
        };
        let Some(owner_id) = owner_id else {
            tracing::warn!(task_id, "dropping tick_minute: no authenticated owner");
            return Ok(());
        };

        let committed = self
            .store
            .increment_actual_time(&owner_id, task_id, 1)
            .await?;

        let Some(task) = cached else {
            tracing::warn!(
                task_id,
                "actual_time advanced but no cached record; skipping derived patch"
            );
            return Ok(());
        };
        let new_actual = match committed {
            Some(value) => value,
            None => task.actual_time + 1,
        };
        let new_progress = derive_progress(new_actual, task.estimated_time);
        let status = if new_progress >= 100 {
            TaskStatus::Completed
        } else {
            TaskStatus::InProgress
        };

        let patch = TaskPatch {
            actual_time: Some(new_actual),
            progress: Some(new_progress),
            status: Some(status),
            ..TaskPatch::default()
        };
        self.store.patch_task(&owner_id, task_id, &patch).await?;
        tracing::info!(task_id, new_actual, new_progress, "reconciled study minute");

        if new_progress >= 100 {
            let mut runtime = self.lock_runtime()?;
            if runtime.active_task_id.as_deref() == Some(task_id) {
                runtime.active_task_id = None;
                runtime.running = false;
                if let Some(started_at) = runtime.session_started_at.take() {
                    let ended_at = (self.now_provider)();
                    runtime.sessions.record(StudySession {
                        id: next_id("ses"),
                        task_title: task.title,
                        subject: task.subject,
                        duration_minutes: (ended_at - started_at).num_minutes().max(0),
                        started_at,
                        ended_at,
                        completed: true,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn today_summary(&self) -> Result<DaySummary, EngineError> {
        let today = (self.now_provider)().date_naive();
        Ok(self.lock_runtime()?.sessions.day_summary(today))
    }

    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<StudySession>, EngineError> {
        Ok(self.lock_runtime()?.sessions.recent(limit))
    }
}

impl<S: RemoteTaskStore + 'static> StudyEngine<S> {
    /// Applies one wall-clock second. When a full minute has accumulated the
    /// reconciliation protocol is dispatched onto the runtime so the
    /// countdown never waits for it; a finished countdown drives the active
    /// task through completion.
    pub async fn tick_second(self: &Arc<Self>) -> Result<(), EngineError> {
        let (tick, active_task_id) = {
            let mut runtime = self.lock_runtime()?;
            if !runtime.running {
                return Ok(());
            }
            let tick = runtime.countdown.tick_second();
            (tick, runtime.active_task_id.clone())
        };

        if tick.minute_elapsed {
            if let Some(task_id) = active_task_id {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(error) = engine.tick_minute(&task_id).await {
                        tracing::warn!(%error, task_id, "minute reconciliation failed");
                    }
                });
            }
        }

        if tick.finished {
            self.complete_active().await?;
        }
        Ok(())
    }

    /// One-second tick loop. Returns once the session stops running; pausing
    /// cancels only this loop, never an in-flight reconciliation.
    pub async fn run_ticker(self: Arc<Self>) -> Result<(), EngineError> {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            if !self.is_running() {
                break;
            }
            self.tick_second().await?;
        }
        Ok(())
    }

    /// Auto-completion path for a countdown that reached zero: the active
    /// task is marked completed, the binding cleared, and the session
    /// recorded as completed.
    async fn complete_active(&self) -> Result<(), EngineError> {
        let (owner_id, task_id, snapshot, started_at) = {
            let mut runtime = self.lock_runtime()?;
            let Some(task_id) = runtime.active_task_id.take() else {
                return Ok(());
            };
            runtime.running = false;
            let snapshot = runtime.mirror.get(&task_id);
            let started_at = runtime.session_started_at.take();
            (runtime.owner_id.clone(), task_id, snapshot, started_at)
        };

        if let (Some(task), Some(started_at)) = (snapshot.as_ref(), started_at) {
            let ended_at = (self.now_provider)();
            let mut runtime = self.lock_runtime()?;
            runtime.sessions.record(StudySession {
                id: next_id("ses"),
                task_title: task.title.clone(),
                subject: task.subject.clone(),
                duration_minutes: (ended_at - started_at).num_minutes().max(0),
                started_at,
                ended_at,
                completed: true,
            });
        }

        let Some(owner_id) = owner_id else {
            tracing::warn!(task_id, "dropping completion patch: no authenticated owner");
            return Ok(());
        };
        let patch = TaskPatch {
            progress: Some(100),
            status: Some(TaskStatus::Completed),
            ..TaskPatch::default()
        };
        self.store.patch_task(&owner_id, &task_id, &patch).await?;
        tracing::info!(task_id, "countdown finished; task driven to completion");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskPriority;
    use crate::infrastructure::memory_store::InMemoryTaskStore;
    use crate::infrastructure::store::SnapshotSubscription;
    use async_trait::async_trait;

    const OWNER: &str = "owner-1";

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn fixed_clock() -> NowProvider {
        Arc::new(|| {
            DateTime::parse_from_rfc3339("2026-08-29T09:00:00Z")
                .expect("valid datetime")
                .with_timezone(&Utc)
        })
    }

    fn sample_task(id: &str, estimated_time: u32, actual_time: u32) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {id}"),
            description: None,
            subject: "Math".to_string(),
            priority: TaskPriority::Medium,
            due_date: fixed_time("2026-09-01T18:00:00Z"),
            estimated_time,
            actual_time,
            progress: derive_progress(actual_time, estimated_time),
            status: TaskStatus::Pending,
        }
    }

    fn sample_draft(title: &str, subject: &str) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            description: None,
            subject: subject.to_string(),
            priority: TaskPriority::Low,
            due_date: fixed_time("2026-09-01T18:00:00Z"),
            estimated_time: 60,
        }
    }

    async fn engine_with_store() -> (Arc<InMemoryTaskStore>, Arc<StudyEngine<InMemoryTaskStore>>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let engine = StudyEngine::new(Arc::clone(&store), EngineConfig::default())
            .with_now_provider(fixed_clock());
        engine.set_identity(Some(OWNER)).expect("bind identity");
        (store, Arc::new(engine))
    }

    async fn stored_task(store: &InMemoryTaskStore, task_id: &str) -> Option<Task> {
        store
            .subscribe(OWNER)
            .expect("subscribe")
            .latest()
            .get(task_id)
            .cloned()
    }

    #[tokio::test]
    async fn add_task_rejects_empty_title_with_no_write() {
        let (store, engine) = engine_with_store().await;
        let result = engine.add_task(sample_draft("", "Math")).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(store.subscribe(OWNER).expect("subscribe").latest().is_empty());
        assert!(engine.tasks().expect("tasks").is_empty());
    }

    #[tokio::test]
    async fn add_task_without_identity_is_dropped() {
        let store = Arc::new(InMemoryTaskStore::new());
        let engine = StudyEngine::new(Arc::clone(&store), EngineConfig::default());
        let result = engine.add_task(sample_draft("Essay", "English")).await;
        assert!(result.is_ok());
        assert!(store.subscribe(OWNER).expect("subscribe").latest().is_empty());
    }

    #[tokio::test]
    async fn add_task_is_observed_through_mirror() {
        let (_store, engine) = engine_with_store().await;
        engine
            .add_task(sample_draft("Essay", "English"))
            .await
            .expect("add task");

        let tasks = engine.tasks().expect("tasks");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Essay");
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[0].actual_time, 0);
        assert_eq!(tasks[0].progress, 0);
    }

    #[tokio::test]
    async fn begin_unknown_task_is_a_noop() {
        let (store, engine) = engine_with_store().await;
        engine.begin_task("missing").await.expect("begin");
        assert_eq!(engine.active_task_id().expect("active"), None);
        assert!(!engine.is_running());
        assert!(store.subscribe(OWNER).expect("subscribe").latest().is_empty());
    }

    #[tokio::test]
    async fn begin_task_binds_runs_and_patches_status() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");

        engine.begin_task("tsk-a").await.expect("begin");

        assert_eq!(
            engine.active_task_id().expect("active"),
            Some("tsk-a".to_string())
        );
        assert!(engine.is_running());
        let stored = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(stored.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn beginning_second_task_leaves_stale_sibling() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        store
            .set_task(OWNER, &sample_task("tsk-b", 60, 0))
            .await
            .expect("seed task");

        engine.begin_task("tsk-a").await.expect("begin a");
        engine.begin_task("tsk-b").await.expect("begin b");

        assert_eq!(
            engine.active_task_id().expect("active"),
            Some("tsk-b".to_string())
        );
        // The first task keeps its remote in-progress status with no timer
        // backing it.
        let sibling = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(sibling.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn delete_active_task_clears_binding_and_stops_timer() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        engine.begin_task("tsk-a").await.expect("begin");

        engine.delete_task("tsk-a").await.expect("delete");

        assert_eq!(engine.active_task_id().expect("active"), None);
        assert!(!engine.is_running());
        assert!(stored_task(&store, "tsk-a").await.is_none());
    }

    #[tokio::test]
    async fn tick_minute_completes_task_at_estimate() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 5, 4))
            .await
            .expect("seed task");
        engine.begin_task("tsk-a").await.expect("begin");

        engine.tick_minute("tsk-a").await.expect("tick");

        let stored = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(stored.actual_time, 5);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(engine.active_task_id().expect("active"), None);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn tick_minute_below_estimate_stays_in_progress() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 10, 2))
            .await
            .expect("seed task");
        engine.begin_task("tsk-a").await.expect("begin");

        engine.tick_minute("tsk-a").await.expect("tick");

        let stored = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(stored.actual_time, 3);
        assert_eq!(stored.progress, 30);
        assert_eq!(stored.status, TaskStatus::InProgress);
        assert_eq!(
            engine.active_task_id().expect("active"),
            Some("tsk-a".to_string())
        );
    }

    #[tokio::test]
    async fn ten_tick_minutes_add_exactly_ten_minutes() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 1000, 0))
            .await
            .expect("seed task");

        for _ in 0..10 {
            engine.tick_minute("tsk-a").await.expect("tick");
        }

        let stored = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(stored.actual_time, 10);
        assert_eq!(stored.progress, 1);
    }

    #[tokio::test]
    async fn tick_minute_on_unknown_task_skips_derived_patch() {
        let (store, engine) = engine_with_store().await;
        engine.tick_minute("missing").await.expect("tick");
        assert!(store.subscribe(OWNER).expect("subscribe").latest().is_empty());
    }

    /// Store that increments the durable counter but never reports the
    /// post-transaction value, forcing the cached-fallback branch.
    struct OpaqueCounterStore {
        inner: InMemoryTaskStore,
    }

    #[async_trait]
    impl RemoteTaskStore for OpaqueCounterStore {
        fn subscribe(&self, owner_id: &str) -> Result<SnapshotSubscription, EngineError> {
            self.inner.subscribe(owner_id)
        }

        async fn allocate_task_id(&self, owner_id: &str) -> Result<String, EngineError> {
            self.inner.allocate_task_id(owner_id).await
        }

        async fn set_task(&self, owner_id: &str, task: &Task) -> Result<(), EngineError> {
            self.inner.set_task(owner_id, task).await
        }

        async fn patch_task(
            &self,
            owner_id: &str,
            task_id: &str,
            patch: &TaskPatch,
        ) -> Result<(), EngineError> {
            self.inner.patch_task(owner_id, task_id, patch).await
        }

        async fn remove_task(&self, owner_id: &str, task_id: &str) -> Result<(), EngineError> {
            self.inner.remove_task(owner_id, task_id).await
        }

        async fn increment_actual_time(
            &self,
            owner_id: &str,
            task_id: &str,
            delta: u32,
        ) -> Result<Option<u32>, EngineError> {
            self.inner
                .increment_actual_time(owner_id, task_id, delta)
                .await?;
            Ok(None)
        }
    }

    /// Store whose transaction result diverges from the local cache, proving
    /// the authoritative value wins over cached-plus-one.
    struct DivergentCounterStore {
        inner: InMemoryTaskStore,
        reported: u32,
    }

    #[async_trait]
    impl RemoteTaskStore for DivergentCounterStore {
        fn subscribe(&self, owner_id: &str) -> Result<SnapshotSubscription, EngineError> {
            self.inner.subscribe(owner_id)
        }

        async fn allocate_task_id(&self, owner_id: &str) -> Result<String, EngineError> {
            self.inner.allocate_task_id(owner_id).await
        }

        async fn set_task(&self, owner_id: &str, task: &Task) -> Result<(), EngineError> {
            self.inner.set_task(owner_id, task).await
        }

        async fn patch_task(
            &self,
            owner_id: &str,
            task_id: &str,
            patch: &TaskPatch,
        ) -> Result<(), EngineError> {
            self.inner.patch_task(owner_id, task_id, patch).await
        }

        async fn remove_task(&self, owner_id: &str, task_id: &str) -> Result<(), EngineError> {
            self.inner.remove_task(owner_id, task_id).await
        }

        async fn increment_actual_time(
            &self,
            _owner_id: &str,
            _task_id: &str,
            _delta: u32,
        ) -> Result<Option<u32>, EngineError> {
            Ok(Some(self.reported))
        }
    }

    #[tokio::test]
    async fn tick_minute_falls_back_to_cached_value() {
        let store = Arc::new(OpaqueCounterStore {
            inner: InMemoryTaskStore::new(),
        });
        let engine = Arc::new(
            StudyEngine::new(Arc::clone(&store), EngineConfig::default())
                .with_now_provider(fixed_clock()),
        );
        engine.set_identity(Some(OWNER)).expect("bind identity");
        store
            .inner
            .set_task(OWNER, &sample_task("tsk-a", 100, 7))
            .await
            .expect("seed task");

        engine.tick_minute("tsk-a").await.expect("tick");

        let stored = stored_task(&store.inner, "tsk-a").await.expect("task exists");
        assert_eq!(stored.actual_time, 8);
        assert_eq!(stored.progress, 8);
    }

    #[tokio::test]
    async fn tick_minute_prefers_authoritative_post_transaction_value() {
        let store = Arc::new(DivergentCounterStore {
            inner: InMemoryTaskStore::new(),
            reported: 42,
        });
        let engine = Arc::new(
            StudyEngine::new(Arc::clone(&store), EngineConfig::default())
                .with_now_provider(fixed_clock()),
        );
        engine.set_identity(Some(OWNER)).expect("bind identity");
        store
            .inner
            .set_task(OWNER, &sample_task("tsk-a", 50, 10))
            .await
            .expect("seed task");

        engine.tick_minute("tsk-a").await.expect("tick");

        let stored = stored_task(&store.inner, "tsk-a").await.expect("task exists");
        assert_eq!(stored.actual_time, 42);
        assert_eq!(stored.progress, 84);
    }

    #[tokio::test]
    async fn end_task_unbinds_and_records_session() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        engine.begin_task("tsk-a").await.expect("begin");

        engine.end_task("tsk-a").expect("end");

        assert_eq!(engine.active_task_id().expect("active"), None);
        assert!(!engine.is_running());
        let sessions = engine.recent_sessions(5).expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].task_title, "Task tsk-a");
        assert!(!sessions[0].completed);

        let summary = engine.today_summary().expect("summary");
        assert_eq!(summary.session_count, 1);
    }

    #[tokio::test]
    async fn stop_preserves_binding_for_resume() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        engine.begin_task("tsk-a").await.expect("begin");

        engine.stop_task().expect("stop");

        assert!(!engine.is_running());
        assert_eq!(
            engine.active_task_id().expect("active"),
            Some("tsk-a".to_string())
        );
        assert!(engine.recent_sessions(5).expect("sessions").is_empty());
    }

    #[tokio::test]
    async fn start_timer_requires_a_selection() {
        let (store, engine) = engine_with_store().await;
        let result = engine.start_timer(None).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));

        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        engine.start_timer(Some("tsk-a")).await.expect("start");
        assert!(engine.is_running());

        engine.stop_task().expect("stop");
        engine.start_timer(None).await.expect("resume via binding");
        assert!(engine.is_running());
    }

    #[tokio::test]
    async fn custom_timer_configuration_is_validated() {
        let (_store, engine) = engine_with_store().await;
        assert!(matches!(
            engine.configure_custom_timer(0, 0),
            Err(EngineError::Validation(_))
        ));

        engine.configure_custom_timer(5, 30).expect("configure");
        let state = engine.timer_state().expect("timer state");
        assert_eq!(state.mode, TimerMode::Custom);
        assert_eq!(state.remaining_seconds, 5 * 60 + 30);

        engine.set_timer_mode(TimerMode::Preset).expect("switch");
        let state = engine.timer_state().expect("timer state");
        assert_eq!(
            state.remaining_seconds,
            EngineConfig::default().preset_duration_seconds
        );
    }

    #[tokio::test]
    async fn finished_countdown_drives_auto_completion() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        engine.configure_custom_timer(0, 2).expect("configure");
        engine.begin_task("tsk-a").await.expect("begin");

        engine.tick_second().await.expect("tick 1");
        assert!(engine.is_running());
        engine.tick_second().await.expect("tick 2");

        assert!(!engine.is_running());
        assert_eq!(engine.active_task_id().expect("active"), None);
        let stored = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.status, TaskStatus::Completed);

        let sessions = engine.recent_sessions(5).expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].completed);
    }

    #[tokio::test]
    async fn tick_second_is_inert_while_paused() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        engine.begin_task("tsk-a").await.expect("begin");
        engine.stop_task().expect("stop");

        let before = engine.timer_state().expect("timer state").remaining_seconds;
        engine.tick_second().await.expect("tick");
        let after = engine.timer_state().expect("timer state").remaining_seconds;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn losing_identity_clears_mirror_and_timer() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        engine.begin_task("tsk-a").await.expect("begin");

        engine.set_identity(None).expect("clear identity");

        assert!(engine.tasks().expect("tasks").is_empty());
        assert_eq!(engine.active_task_id().expect("active"), None);
        assert!(!engine.is_running());

        // Subsequent writes are dropped, not raised.
        engine
            .edit_task(
                "tsk-a",
                TaskPatch {
                    progress: Some(50),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("edit dropped");
        let stored = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(stored.progress, 0);
    }

    #[tokio::test]
    async fn update_progress_patches_without_touching_binding() {
        let (store, engine) = engine_with_store().await;
        store
            .set_task(OWNER, &sample_task("tsk-a", 60, 0))
            .await
            .expect("seed task");
        engine.begin_task("tsk-a").await.expect("begin");

        engine
            .update_progress("tsk-a", 100, true)
            .await
            .expect("update progress");

        let stored = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(
            engine.active_task_id().expect("active"),
            Some("tsk-a".to_string())
        );
    }

    #[tokio::test]
    async fn explicit_reopen_edit_bypasses_state_machine() {
        let (store, engine) = engine_with_store().await;
        let mut task = sample_task("tsk-a", 5, 5);
        task.progress = 100;
        task.status = TaskStatus::Completed;
        store.set_task(OWNER, &task).await.expect("seed task");

        engine
            .edit_task(
                "tsk-a",
                TaskPatch {
                    status: Some(TaskStatus::InProgress),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("reopen");

        let stored = stored_task(&store, "tsk-a").await.expect("task exists");
        assert_eq!(stored.status, TaskStatus::InProgress);
    }
}
