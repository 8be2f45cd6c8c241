pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::engine::{NowProvider, StudyEngine, TimerStateView};
pub use application::mirror::TaskMirror;
pub use application::session_log::{DaySummary, SessionLog};
pub use application::timer::{Countdown, SecondTick, TimerMode};
pub use domain::models::{
    StudySession, Task, TaskDraft, TaskPatch, TaskPriority, TaskStatus, derive_progress,
};
pub use infrastructure::config::{EngineConfig, ensure_default_config, load_config};
pub use infrastructure::error::EngineError;
pub use infrastructure::memory_store::InMemoryTaskStore;
pub use infrastructure::store::{RemoteTaskStore, SnapshotSubscription, TaskSnapshot};
