use agentmesh_core::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Execution state of one workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting on dependencies.
    Pending,
    /// All dependencies satisfied; eligible for dispatch.
    Ready,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Done,
    /// Failed, either directly or by propagation from a failed dependency.
    Failed,
}

/// One schedulable unit of the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique key within the graph (typically an analysis step name).
    pub key: String,
    /// Keys this node waits on. Keys outside the graph count as satisfied.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Lower executes in an earlier wave when otherwise unordered.
    #[serde(default)]
    pub priority: i32,
    /// Execution state.
    #[serde(default = "default_status")]
    pub status: NodeStatus,
}

fn default_status() -> NodeStatus {
    NodeStatus::Pending
}

impl WorkflowNode {
    /// A pending node with no dependencies and priority 0.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            depends_on: BTreeSet::new(),
            priority: 0,
            status: NodeStatus::Pending,
        }
    }

    /// Add dependency keys.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Set the priority tier (lower runs earlier).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// An ordered list of waves; each wave's node keys execute concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Waves in dispatch order.
    pub waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Total number of nodes across all waves.
    pub fn node_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }
}

/// The dependency graph for one workflow request.
#[derive(Debug)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, WorkflowNode>,
}

impl WorkflowGraph {
    /// Build a graph, rejecting duplicate keys.
    pub fn new(nodes: Vec<WorkflowNode>) -> MeshResult<Self> {
        let mut map = BTreeMap::new();
        for node in nodes {
            if map.insert(node.key.clone(), node).is_some() {
                return Err(MeshError::Coordination(
                    "duplicate workflow node key".to_string(),
                ));
            }
        }
        Ok(Self { nodes: map })
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    pub fn get(&self, key: &str) -> Option<&WorkflowNode> {
        self.nodes.get(key)
    }

    fn deps_in_graph<'a>(&'a self, node: &'a WorkflowNode) -> impl Iterator<Item = &'a String> {
        node.depends_on
            .iter()
            .filter(|dep| self.nodes.contains_key(*dep))
    }

    /// Compute the wave plan without mutating node state.
    ///
    /// Each round gathers the nodes whose in-graph dependencies are all
    /// satisfied and groups the lowest priority tier among them into one
    /// wave. A round with unfinished nodes but nothing satisfiable is a
    /// dependency cycle: planning aborts with [`MeshError::Coordination`]
    /// and no partial plan is returned.
    pub fn plan(&self) -> MeshResult<ExecutionPlan> {
        let mut satisfied: HashSet<&str> = HashSet::new();
        let mut remaining: BTreeSet<&str> = self.nodes.keys().map(String::as_str).collect();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<&WorkflowNode> = remaining
                .iter()
                .map(|key| &self.nodes[*key])
                .filter(|node| self.deps_in_graph(node).all(|dep| satisfied.contains(dep.as_str())))
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = remaining.iter().copied().collect();
                return Err(MeshError::Coordination(format!(
                    "dependency cycle among workflow nodes: {}",
                    stuck.join(", ")
                )));
            }

            let tier = ready
                .iter()
                .map(|node| node.priority)
                .min()
                .unwrap_or_default();
            // BTreeMap iteration keeps wave membership deterministic.
            let wave: Vec<String> = ready
                .iter()
                .filter(|node| node.priority == tier)
                .map(|node| node.key.clone())
                .collect();

            for key in &wave {
                satisfied.insert(self.nodes[key].key.as_str());
                remaining.remove(key.as_str());
            }
            debug!(wave = waves.len() + 1, members = wave.len(), "planned wave");
            waves.push(wave);
        }

        Ok(ExecutionPlan { waves })
    }

    /// Promote pending nodes whose dependencies are all done to `Ready`.
    ///
    /// Returns the promoted keys.
    pub fn promote_ready(&mut self) -> Vec<String> {
        let promoted: Vec<String> = self
            .nodes
            .values()
            .filter(|node| node.status == NodeStatus::Pending)
            .filter(|node| {
                self.deps_in_graph(node)
                    .all(|dep| self.nodes[dep].status == NodeStatus::Done)
            })
            .map(|node| node.key.clone())
            .collect();
        for key in &promoted {
            if let Some(node) = self.nodes.get_mut(key) {
                node.status = NodeStatus::Ready;
            }
        }
        promoted
    }

    /// Mark a node as running.
    pub fn mark_running(&mut self, key: &str) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.status = NodeStatus::Running;
        }
    }

    /// Mark a node as done.
    pub fn mark_done(&mut self, key: &str) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.status = NodeStatus::Done;
        }
    }

    /// Mark a node as failed and propagate to its transitive dependents.
    ///
    /// Dependents are failed-by-propagation rather than attempted; nodes
    /// that do not depend on the failed node are untouched. Returns the
    /// keys failed by propagation.
    pub fn mark_failed(&mut self, key: &str) -> Vec<String> {
        let Some(node) = self.nodes.get_mut(key) else {
            return Vec::new();
        };
        node.status = NodeStatus::Failed;

        let mut failed: HashSet<String> = HashSet::from([key.to_string()]);
        let mut propagated = Vec::new();
        // Fixed-point pass; the graph is acyclic and small.
        loop {
            let next: Vec<String> = self
                .nodes
                .values()
                .filter(|n| !failed.contains(&n.key))
                .filter(|n| n.depends_on.iter().any(|dep| failed.contains(dep)))
                .map(|n| n.key.clone())
                .collect();
            if next.is_empty() {
                break;
            }
            for k in next {
                if let Some(n) = self.nodes.get_mut(&k) {
                    n.status = NodeStatus::Failed;
                }
                failed.insert(k.clone());
                propagated.push(k);
            }
        }
        propagated.sort();
        propagated
    }

    /// Whether every node reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.nodes
            .values()
            .all(|n| matches!(n.status, NodeStatus::Done | NodeStatus::Failed))
    }

    /// Snapshot of all node statuses.
    pub fn statuses(&self) -> BTreeMap<String, NodeStatus> {
        self.nodes
            .iter()
            .map(|(k, n)| (k.clone(), n.status))
            .collect()
    }
}
