use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of a [`MeshEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task record was created.
    TaskCreated,
    /// A task was dispatched to its agent.
    TaskStarted,
    /// A task reported intermediate progress.
    TaskProgress,
    /// A task completed with a result.
    TaskCompleted,
    /// A task failed.
    TaskFailed,
    /// A task was cancelled.
    TaskCancelled,
    /// A workflow wave began executing.
    WaveStarted,
    /// A workflow wave reached a terminal state for all members.
    WaveFinished,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TaskCreated => "task_created",
            Self::TaskStarted => "task_started",
            Self::TaskProgress => "task_progress",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskCancelled => "task_cancelled",
            Self::WaveStarted => "wave_started",
            Self::WaveFinished => "wave_finished",
        };
        write!(f, "{s}")
    }
}

/// A structured progress event.
///
/// Producers push these into a typed channel; the push notifier and the
/// tracing logger consume that channel independently, so reporting progress
/// is decoupled from delivering it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The task this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    /// The agent this event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Free-form event detail.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl MeshEvent {
    /// Build an event of `kind` with no task/agent attribution.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            task_id: None,
            agent_name: None,
            timestamp: Utc::now(),
            detail: serde_json::Value::Null,
        }
    }

    /// Build an event attributed to a task and agent.
    pub fn for_task(kind: EventKind, task_id: Uuid, agent_name: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: Some(task_id),
            agent_name: Some(agent_name.into()),
            timestamp: Utc::now(),
            detail: serde_json::Value::Null,
        }
    }

    /// Attach free-form detail.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
