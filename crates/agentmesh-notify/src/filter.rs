use agentmesh_core::{EventKind, MeshEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Per-subscriber event predicate.
///
/// Every populated field must match for an event to be delivered; an empty
/// filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only these event kinds; `None` = all kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_types: Option<HashSet<EventKind>>,
    /// Only events attributed to these agents; `None` = all agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_names: Option<HashSet<String>>,
    /// Only events attributed to these tasks; `None` = all tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ids: Option<HashSet<Uuid>>,
    /// Topics this subscriber listens on (used by topic broadcasts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<HashSet<String>>,
}

impl EventFilter {
    /// A filter that matches every event.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// A filter restricted to one agent name.
    pub fn for_agent(name: impl Into<String>) -> Self {
        Self {
            agent_names: Some(HashSet::from([name.into()])),
            ..Self::default()
        }
    }

    /// A filter restricted to one task id.
    pub fn for_task(task_id: Uuid) -> Self {
        Self {
            task_ids: Some(HashSet::from([task_id])),
            ..Self::default()
        }
    }

    /// Whether `event` passes this filter.
    ///
    /// An event without an agent/task attribution fails a populated
    /// agent/task restriction: a subscriber asking for agent `X` only gets
    /// events known to be about `X`.
    pub fn matches(&self, event: &MeshEvent) -> bool {
        if let Some(kinds) = &self.event_types {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(agents) = &self.agent_names {
            match &event.agent_name {
                Some(name) if agents.contains(name) => {}
                _ => return false,
            }
        }
        if let Some(tasks) = &self.task_ids {
            match event.task_id {
                Some(id) if tasks.contains(&id) => {}
                _ => return false,
            }
        }
        true
    }

    /// Whether this subscriber listens on `topic`.
    pub fn subscribed_to(&self, topic: &str) -> bool {
        self.topics
            .as_ref()
            .is_some_and(|topics| topics.contains(topic))
    }
}
