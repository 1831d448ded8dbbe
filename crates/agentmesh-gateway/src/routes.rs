use crate::server::AppState;
use agentmesh_core::{AgentRequest, AgentResponse, MeshError, TaskStatus};
use agentmesh_orchestrator::ExecuteRequest;
use agentmesh_tasks::TaskFilter;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({"error": message.into()})
}

/// `GET /health` — component health; 200 when all healthy, else 503.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let store = state.engine.store().stats().await;
    let notifier = state.notifier.stats().await;

    // A store pinned at capacity is evicting live work.
    let store_healthy = store.total_tasks < store.max_tasks;
    let status = if store_healthy { "ok" } else { "degraded" };
    let code = if store_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": status,
        "components": {
            "taskStore": store,
            "pushNotifier": notifier,
        },
    });
    (code, Json(body)).into_response()
}

/// Body of `POST /api/v1/agent/execute`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    agent_name: Option<String>,
    query: Option<serde_json::Value>,
    context_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// `POST /api/v1/agent/execute` — run one agent call to completion.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExecuteBody>,
) -> Response {
    let Some(agent_name) = body.agent_name.filter(|name| !name.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(error_body("agentName is required"))).into_response();
    };
    let Some(query) = body.query else {
        return (StatusCode::BAD_REQUEST, Json(error_body("query is required"))).into_response();
    };

    let request = ExecuteRequest {
        agent_name,
        query,
        context_id: body.context_id,
        metadata: body.metadata,
    };

    match state.engine.execute(request).await {
        Ok(outcome) => {
            let body = serde_json::json!({
                "taskId": outcome.task_id,
                "status": outcome.status,
                "result": outcome.result,
                "error": outcome.error,
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            error!(error = %e, "execute failed internally");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body(e.to_string())),
            )
                .into_response()
        }
    }
}

/// One step of a workflow request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepBody {
    key: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    priority: i32,
}

/// Body of `POST /api/v1/workflow/execute`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowBody {
    steps: Vec<WorkflowStepBody>,
    #[serde(default)]
    queries: HashMap<String, serde_json::Value>,
    #[serde(default)]
    thresholds: Vec<agentmesh_quality::QualityThreshold>,
}

/// `POST /api/v1/workflow/execute` — plan and run a dependency workflow.
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WorkflowBody>,
) -> Response {
    if body.steps.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(error_body("steps are required"))).into_response();
    }
    let steps: Vec<agentmesh_workflow::WorkflowNode> = body
        .steps
        .into_iter()
        .map(|step| {
            agentmesh_workflow::WorkflowNode::new(step.key)
                .with_dependencies(step.depends_on)
                .with_priority(step.priority)
        })
        .collect();

    match state
        .engine
        .run_workflow(steps, body.queries, &body.thresholds)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        // Duplicate keys and cycles are caller errors, caught pre-dispatch.
        Err(e @ MeshError::Coordination(_)) => {
            (StatusCode::BAD_REQUEST, Json(error_body(e.to_string()))).into_response()
        }
        Err(e) => {
            error!(error = %e, "workflow failed internally");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body(e.to_string())),
            )
                .into_response()
        }
    }
}

/// `POST /rpc` — the agent-to-agent wire envelope endpoint.
///
/// Serving this makes a mesh node addressable as an agent in another
/// node's port registry. The target handler is named by the `agent`
/// metadata entry; the built-in echo handler answers liveness wiring.
pub async fn rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AgentRequest>,
) -> Json<AgentResponse> {
    if request.method != "agent/execute" {
        return Json(AgentResponse::err(
            request.id,
            -32601,
            format!("unknown method '{}'", request.method),
        ));
    }

    let agent_name = request
        .params
        .metadata
        .get("agent")
        .and_then(|v| v.as_str())
        .unwrap_or("echo")
        .to_string();
    let exec = ExecuteRequest {
        agent_name,
        query: request.params.message,
        context_id: None,
        metadata: request.params.metadata,
    };

    match state.engine.execute(exec).await {
        Ok(outcome) => match outcome.status {
            TaskStatus::Completed => Json(AgentResponse::ok(
                request.id,
                outcome.result.unwrap_or(serde_json::Value::Null),
            )),
            _ => Json(AgentResponse::err(
                request.id,
                -32000,
                outcome.error.unwrap_or_else(|| "agent failed".to_string()),
            )),
        },
        Err(e) => Json(AgentResponse::err(request.id, -32603, e.to_string())),
    }
}

/// `GET /api/v1/tasks/{task_id}` — the full task record, or 404.
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Response {
    match state.engine.store().get_task(task_id).await {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(error_body("task not found"))).into_response(),
    }
}

/// Query parameters of `GET /api/v1/tasks`.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    status: Option<String>,
    #[serde(alias = "agentName")]
    agent_name: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

/// `GET /api/v1/tasks` — paginated task list with status/agent filters.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => match serde_json::from_value::<TaskStatus>(serde_json::Value::from(raw)) {
            Ok(status) => Some(status),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(error_body(format!("unknown status '{raw}'"))),
                )
                    .into_response();
            }
        },
    };

    let filter = TaskFilter {
        status,
        agent_name: params.agent_name,
        limit: params.limit,
        offset: params.offset,
    };
    let tasks = state.engine.store().list_tasks(&filter).await;
    let body = serde_json::json!({
        "count": tasks.len(),
        "offset": filter.offset,
        "tasks": tasks,
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// `POST /api/v1/tasks/{task_id}/cancel` — cancel a live task.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Response {
    match state.engine.cancel_task(task_id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({"taskId": task_id, "status": TaskStatus::Cancelled})),
        )
            .into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, Json(error_body("task not found"))).into_response(),
        Err(e @ MeshError::Store(_)) => {
            (StatusCode::CONFLICT, Json(error_body(e.to_string()))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_body(e.to_string())),
        )
            .into_response(),
    }
}

/// `DELETE /api/v1/tasks/{task_id}` — drop a task record.
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Response {
    if state.engine.store().delete_task(task_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(error_body("task not found"))).into_response()
    }
}
