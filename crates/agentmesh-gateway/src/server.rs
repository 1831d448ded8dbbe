use crate::{routes, ws};
use agentmesh_notify::PushNotifier;
use agentmesh_orchestrator::Engine;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    /// The orchestration engine (and through it, the task store).
    pub engine: Arc<Engine>,
    /// The push notifier backing `/ws/notifications`.
    pub notifier: Arc<PushNotifier>,
}

/// The gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway router over an engine and notifier.
    pub fn build(engine: Arc<Engine>, notifier: Arc<PushNotifier>) -> Router {
        let state = Arc::new(AppState { engine, notifier });

        Router::new()
            .route("/health", get(routes::health))
            .route("/rpc", post(routes::rpc))
            .route("/api/v1/agent/execute", post(routes::execute))
            .route("/api/v1/workflow/execute", post(routes::execute_workflow))
            .route("/api/v1/tasks", get(routes::list_tasks))
            .route("/api/v1/tasks/{task_id}", get(routes::get_task))
            .route("/api/v1/tasks/{task_id}", delete(routes::delete_task))
            .route("/api/v1/tasks/{task_id}/cancel", post(routes::cancel_task))
            .route("/ws/notifications", get(ws::ws_handler))
            .with_state(state)
    }
}
