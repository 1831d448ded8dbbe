use crate::{MeshError, MeshResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a [`TaskRecord`].
///
/// Transitions are monotonic: `Pending → Running → {Completed | Failed}`,
/// with `Cancelled` reachable from `Pending` or `Running` only. A record in
/// a terminal status is immutable apart from deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet dispatched.
    Pending,
    /// Dispatched to an agent, awaiting a result.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Abandoned before completion.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition from `self` to `next` respects the state machine.
    ///
    /// Completion requires the task to have run; failure is also reachable
    /// straight from `Pending` (a task rejected before dispatch, e.g. an
    /// unresolvable agent name, must not be left pending forever).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One timestamped entry in a task's append-only progress log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// When the progress was recorded.
    pub at: DateTime<Utc>,
    /// Human-readable progress message.
    pub message: String,
    /// Optional stage label (e.g. a workflow node key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// One unit of orchestrated work tracked by the task store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique identifier for this task.
    pub id: Uuid,
    /// Logical name of the agent handling the task.
    pub agent_name: String,
    /// Opaque query payload handed to the agent.
    pub query: serde_json::Value,
    /// Conversation/session correlation key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// UTC creation time (server-assigned).
    pub created_at: DateTime<Utc>,
    /// UTC time of the last mutation (server-assigned).
    pub updated_at: DateTime<Utc>,
    /// UTC time past which the record is considered expired.
    pub expires_at: DateTime<Utc>,
    /// Result payload, present iff the task completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error description, present iff the task failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Append-only log of progress events.
    #[serde(default)]
    pub progress: Vec<ProgressEntry>,
    /// Open key/value metadata map.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskRecord {
    /// Create a pending task for `agent_name` expiring `ttl` from now.
    pub fn new(agent_name: impl Into<String>, query: serde_json::Value, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_name: agent_name.into(),
            query,
            context_id: None,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            result: None,
            error: None,
            progress: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a correlation key.
    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether the record has passed its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Append a progress entry and bump `updated_at`.
    pub fn push_progress(&mut self, message: impl Into<String>, stage: Option<String>) {
        let now = Utc::now();
        self.progress.push(ProgressEntry {
            at: now,
            message: message.into(),
            stage,
        });
        self.updated_at = now;
    }

    /// Apply a partial update, enforcing the status state machine.
    ///
    /// Returns an error if the patch asks for an illegal status transition;
    /// all other fields are merged. `updated_at` is bumped on success.
    pub fn apply(&mut self, patch: TaskPatch) -> MeshResult<()> {
        if let Some(next) = patch.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(MeshError::Store(format!(
                    "illegal status transition {} -> {} for task {}",
                    self.status, next, self.id
                )));
            }
            self.status = next;
        } else if self.status.is_terminal() {
            // Terminal records are immutable apart from deletion.
            return Err(MeshError::Store(format!(
                "task {} is {} and cannot be updated",
                self.id, self.status
            )));
        }

        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(message) = patch.progress_message {
            self.progress.push(ProgressEntry {
                at: Utc::now(),
                message,
                stage: patch.progress_stage,
            });
        }
        for (key, value) in patch.metadata {
            self.metadata.insert(key, value);
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A partial update to a [`TaskRecord`], applied under the store's lock.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New status, validated against the state machine.
    pub status: Option<TaskStatus>,
    /// Result payload to set.
    pub result: Option<serde_json::Value>,
    /// Error description to set.
    pub error: Option<String>,
    /// Progress message to append.
    pub progress_message: Option<String>,
    /// Stage label for the appended progress message.
    pub progress_stage: Option<String>,
    /// Metadata entries to merge in.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskPatch {
    /// A patch that only moves the task to `status`.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A patch completing the task with `result`.
    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            result: Some(result),
            ..Self::default()
        }
    }

    /// A patch failing the task with `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// A patch appending one progress message.
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            progress_message: Some(message.into()),
            ..Self::default()
        }
    }
}
