use crate::events::EventBus;
use crate::handler::HandlerRegistry;
use agentmesh_core::{EventKind, MeshEvent, MeshResult, TaskPatch, TaskRecord, TaskStatus};
use agentmesh_quality::{QualityDomain, QualityGate, QualityThreshold, QualityVerdict};
use agentmesh_tasks::TaskStore;
use agentmesh_workflow::{NodeStatus, WorkflowGraph, WorkflowNode};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL assigned to task records at creation.
    pub task_ttl: Duration,
    /// Upper bound on one agent call, over and above the client's own timeout.
    pub call_timeout: Duration,
    /// Threshold bundle applied to workflow aggregates.
    pub quality_domain: QualityDomain,
    /// Whether quality extraction errors fail closed.
    pub strict_quality: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_ttl: Duration::from_secs(3600),
            call_timeout: Duration::from_secs(60),
            quality_domain: QualityDomain::Generic,
            strict_quality: false,
        }
    }
}

/// One agent call as submitted by a caller.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Logical agent name.
    pub agent_name: String,
    /// Opaque query payload.
    pub query: serde_json::Value,
    /// Conversation/session correlation key.
    pub context_id: Option<String>,
    /// Caller metadata, copied onto the task record.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecuteRequest {
    /// A request with no context or metadata.
    pub fn new(agent_name: impl Into<String>, query: serde_json::Value) -> Self {
        Self {
            agent_name: agent_name.into(),
            query,
            context_id: None,
            metadata: HashMap::new(),
        }
    }
}

/// Result of one agent call, always structured — never a raw stack trace.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutcome {
    /// Id of the task record tracking the call.
    pub task_id: Uuid,
    /// Terminal status of the task.
    pub status: TaskStatus,
    /// Result payload iff completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error description iff failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-node outcome of a workflow run.
///
/// A node that could not produce a result is an explicit `Unavailable`
/// marker — never silently substituted data; the caller decides whether to
/// degrade or fail.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeResult {
    /// The node produced a result.
    Completed {
        /// The node's result payload.
        result: serde_json::Value,
    },
    /// The node failed or was never attempted.
    Unavailable {
        /// Why no result exists.
        reason: String,
    },
}

/// Aggregated outcome of a workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    /// The executed plan, wave by wave.
    pub waves: Vec<Vec<String>>,
    /// Per-node results keyed by node key.
    pub results: BTreeMap<String, NodeResult>,
    /// Quality verdict over the aggregate of completed results.
    pub verdict: QualityVerdict,
    /// Nodes that completed.
    pub completed: usize,
    /// Nodes that failed directly or by propagation.
    pub failed: usize,
}

/// The orchestration engine.
///
/// Every agent call is recorded as a task in the store, driven through its
/// lifecycle by the engine, and narrated on the event bus. Workflow runs
/// execute the planned waves member-concurrently, joining the whole wave
/// before the next starts.
pub struct Engine {
    handlers: Arc<HandlerRegistry>,
    store: Arc<TaskStore>,
    events: EventBus,
    gate: QualityGate,
    config: EngineConfig,
}

impl Engine {
    /// Build an engine.
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        store: Arc<TaskStore>,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        let gate = if config.strict_quality {
            QualityGate::strict()
        } else {
            QualityGate::new()
        };
        Self {
            handlers,
            store,
            events,
            gate,
            config,
        }
    }

    /// The task store backing this engine.
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// The progress event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Registered agent names.
    pub fn agent_names(&self) -> Vec<String> {
        self.handlers.names()
    }

    /// Execute one agent call, recording it as a task.
    ///
    /// An unresolvable agent name fails the task immediately — the record
    /// is never left pending or running. Handler errors become a failed
    /// outcome; only store-level problems surface as `Err`.
    pub async fn execute(&self, request: ExecuteRequest) -> MeshResult<ExecuteOutcome> {
        let ttl = chrono::Duration::from_std(self.config.task_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let mut record = TaskRecord::new(&request.agent_name, request.query.clone(), ttl)
            .with_metadata(request.metadata.clone());
        if let Some(context) = &request.context_id {
            record = record.with_context(context.clone());
        }
        let task_id = self.store.create_task(record).await?;
        self.events.emit(MeshEvent::for_task(
            EventKind::TaskCreated,
            task_id,
            &request.agent_name,
        ));

        let handler = match self.handlers.resolve(&request.agent_name) {
            Ok(handler) => handler,
            Err(e) => {
                // Not retried, not dispatched: fail the record in place.
                let message = e.to_string();
                self.store
                    .update_task(task_id, TaskPatch::failed(message.clone()))
                    .await?;
                self.events.emit(
                    MeshEvent::for_task(EventKind::TaskFailed, task_id, &request.agent_name)
                        .with_detail(serde_json::json!({"error": message})),
                );
                return Ok(ExecuteOutcome {
                    task_id,
                    status: TaskStatus::Failed,
                    result: None,
                    error: Some(message),
                });
            }
        };

        self.store
            .update_task(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Running),
                    progress_message: Some(format!("dispatched to {}", request.agent_name)),
                    ..TaskPatch::default()
                },
            )
            .await?;
        self.events.emit(MeshEvent::for_task(
            EventKind::TaskStarted,
            task_id,
            &request.agent_name,
        ));

        let attempt = tokio::time::timeout(
            self.config.call_timeout,
            handler.handle(request.query, request.metadata),
        )
        .await;

        match attempt {
            Ok(Ok(result)) => {
                match self
                    .store
                    .update_task(task_id, TaskPatch::completed(result.clone()))
                    .await
                {
                    Ok(_) => {
                        self.events.emit(MeshEvent::for_task(
                            EventKind::TaskCompleted,
                            task_id,
                            &request.agent_name,
                        ));
                        info!(task = %task_id, agent = %request.agent_name, "task completed");
                        Ok(ExecuteOutcome {
                            task_id,
                            status: TaskStatus::Completed,
                            result: Some(result),
                            error: None,
                        })
                    }
                    // The record went terminal underneath us (cancelled mid-
                    // flight); report its actual state instead of erroring.
                    Err(_) => {
                        let status = self
                            .store
                            .get_task(task_id)
                            .await
                            .map_or(TaskStatus::Cancelled, |r| r.status);
                        Ok(ExecuteOutcome {
                            task_id,
                            status,
                            result: Some(result),
                            error: None,
                        })
                    }
                }
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                self.fail_task(task_id, &request.agent_name, &message).await?;
                Ok(ExecuteOutcome {
                    task_id,
                    status: TaskStatus::Failed,
                    result: None,
                    error: Some(message),
                })
            }
            Err(_) => {
                let message = format!(
                    "agent call timed out after {:?}",
                    self.config.call_timeout
                );
                self.fail_task(task_id, &request.agent_name, &message).await?;
                Ok(ExecuteOutcome {
                    task_id,
                    status: TaskStatus::Failed,
                    result: None,
                    error: Some(message),
                })
            }
        }
    }

    async fn fail_task(&self, task_id: Uuid, agent: &str, message: &str) -> MeshResult<()> {
        warn!(task = %task_id, agent, error = message, "task failed");
        // Tolerate a record that went terminal underneath us.
        if let Err(e) = self
            .store
            .update_task(task_id, TaskPatch::failed(message))
            .await
        {
            warn!(task = %task_id, error = %e, "could not record task failure");
        }
        self.events.emit(
            MeshEvent::for_task(EventKind::TaskFailed, task_id, agent)
                .with_detail(serde_json::json!({"error": message})),
        );
        Ok(())
    }

    /// Cancel a pending or running task.
    ///
    /// Returns whether a live record was cancelled; terminal records
    /// surface the illegal-transition error.
    pub async fn cancel_task(&self, task_id: Uuid) -> MeshResult<bool> {
        let Some(record) = self.store.get_task(task_id).await else {
            return Ok(false);
        };
        let cancelled = self
            .store
            .update_task(task_id, TaskPatch::status(TaskStatus::Cancelled))
            .await?;
        if cancelled {
            self.events.emit(MeshEvent::for_task(
                EventKind::TaskCancelled,
                task_id,
                record.agent_name,
            ));
        }
        Ok(cancelled)
    }

    /// Run a workflow: plan waves, execute them in order, gate the aggregate.
    ///
    /// A cyclic graph aborts before any dispatch. Within a wave the members
    /// run concurrently and the whole wave is joined before the next
    /// starts. A node failure marks its transitive dependents unavailable
    /// without touching independent branches.
    pub async fn run_workflow(
        &self,
        steps: Vec<WorkflowNode>,
        queries: HashMap<String, serde_json::Value>,
        overrides: &[QualityThreshold],
    ) -> MeshResult<WorkflowOutcome> {
        let mut graph = WorkflowGraph::new(steps)?;
        let plan = graph.plan()?;
        let context_id = Uuid::new_v4().to_string();
        info!(waves = plan.waves.len(), nodes = plan.node_count(), "workflow planned");

        let mut results: BTreeMap<String, NodeResult> = BTreeMap::new();

        for (index, wave) in plan.waves.iter().enumerate() {
            self.events.emit(MeshEvent::new(EventKind::WaveStarted).with_detail(
                serde_json::json!({"wave": index + 1, "members": wave}),
            ));
            graph.promote_ready();

            let mut members = Vec::new();
            for key in wave {
                if graph.get(key).map(|n| n.status) == Some(NodeStatus::Failed) {
                    // Failed by propagation before its wave came up; the
                    // Unavailable marker was already recorded.
                    continue;
                }
                graph.mark_running(key);
                let request = ExecuteRequest {
                    agent_name: key.clone(),
                    query: queries.get(key).cloned().unwrap_or(serde_json::Value::Null),
                    context_id: Some(context_id.clone()),
                    metadata: HashMap::new(),
                };
                let key = key.clone();
                members.push(async move { (key, self.execute(request).await) });
            }

            // Join the whole wave; a later wave never starts early.
            let outcomes = futures_util::future::join_all(members).await;
            for (key, outcome) in outcomes {
                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.record_node_failure(&mut graph, &mut results, &key, e.to_string());
                        continue;
                    }
                };

                if outcome.status == TaskStatus::Completed {
                    graph.mark_done(&key);
                    results.insert(
                        key,
                        NodeResult::Completed {
                            result: outcome.result.unwrap_or(serde_json::Value::Null),
                        },
                    );
                } else {
                    let reason = outcome
                        .error
                        .unwrap_or_else(|| "agent failed".to_string());
                    self.record_node_failure(&mut graph, &mut results, &key, reason);
                }
            }

            self.events.emit(MeshEvent::new(EventKind::WaveFinished).with_detail(
                serde_json::json!({"wave": index + 1}),
            ));
        }

        let aggregate: serde_json::Value = results
            .iter()
            .filter_map(|(key, node)| match node {
                NodeResult::Completed { result } => Some((key.clone(), result.clone())),
                NodeResult::Unavailable { .. } => None,
            })
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();
        let verdict = self
            .gate
            .validate_domain(&aggregate, self.config.quality_domain, overrides);

        let completed = results
            .values()
            .filter(|r| matches!(r, NodeResult::Completed { .. }))
            .count();
        let failed = results.len() - completed;

        Ok(WorkflowOutcome {
            waves: plan.waves,
            results,
            verdict,
            completed,
            failed,
        })
    }

    fn record_node_failure(
        &self,
        graph: &mut WorkflowGraph,
        results: &mut BTreeMap<String, NodeResult>,
        key: &str,
        reason: String,
    ) {
        let propagated = graph.mark_failed(key);
        results.insert(key.to_string(), NodeResult::Unavailable { reason: reason.clone() });
        for dependent in propagated {
            results.insert(
                dependent,
                NodeResult::Unavailable {
                    reason: format!("dependency {key} failed: {reason}"),
                },
            );
        }
    }
}
