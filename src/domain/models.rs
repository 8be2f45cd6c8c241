use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// A task record as held by the remote store. The engine's mirror keeps a
/// read replica; `progress` is always derived from the last committed
/// `actual_time`/`estimated_time` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub subject: String,
    pub priority: TaskPriority,
    pub due_date: DateTime<Utc>,
    pub estimated_time: u32,
    pub actual_time: u32,
    pub progress: u8,
    pub status: TaskStatus,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        validate_non_empty(&self.subject, "task.subject")?;
        if self.estimated_time == 0 {
            return Err("task.estimated_time must be > 0".to_string());
        }
        if self.progress > 100 {
            return Err("task.progress must be <= 100".to_string());
        }
        Ok(())
    }
}

/// Creation payload: every task field minus the store-assigned id and the
/// derived trio (actual time starts at zero, progress at zero, status at
/// pending).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub subject: String,
    pub priority: TaskPriority,
    pub due_date: DateTime<Utc>,
    pub estimated_time: u32,
}

impl TaskDraft {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "task.title")?;
        validate_non_empty(&self.subject, "task.subject")?;
        Ok(())
    }

    pub fn into_task(self, id: String) -> Task {
        Task {
            id,
            title: self.title.trim().to_string(),
            description: self
                .description
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            subject: self.subject.trim().to_string(),
            priority: self.priority,
            due_date: self.due_date,
            estimated_time: self.estimated_time,
            actual_time: 0,
            progress: 0,
            status: TaskStatus::Pending,
        }
    }
}

/// Partial record for merge-patch writes. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(subject) = &self.subject {
            task.subject = subject.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(estimated_time) = self.estimated_time {
            task.estimated_time = estimated_time;
        }
        if let Some(actual_time) = self.actual_time {
            task.actual_time = actual_time;
        }
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
    }
}

/// A completed study interval. Process-local only: the session log is cleared
/// on restart and never written to the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudySession {
    pub id: String,
    pub task_title: String,
    pub subject: String,
    pub duration_minutes: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub completed: bool,
}

/// `min(100, round(actual / max(1, estimated) * 100))`, the one derivation
/// rule the reconciliation protocol hangs off.
pub fn derive_progress(actual_time: u32, estimated_time: u32) -> u8 {
    let ratio = f64::from(actual_time) / f64::from(estimated_time.max(1));
    (ratio * 100.0).round().min(100.0) as u8
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
