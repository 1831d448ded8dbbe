use crate::server::AppState;
use agentmesh_core::EventKind;
use agentmesh_notify::EventFilter;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Filter and resubscribe parameters for `/ws/notifications`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Resume a previous subscription and flush its backlog.
    pub subscription_id: Option<Uuid>,
    /// Comma-separated agent names to watch.
    pub agents: Option<String>,
    /// Comma-separated event types to watch.
    pub types: Option<String>,
    /// Comma-separated task ids to watch.
    pub tasks: Option<String>,
    /// Comma-separated topics to join.
    pub topics: Option<String>,
}

impl WsParams {
    fn has_filters(&self) -> bool {
        self.agents.is_some() || self.types.is_some() || self.tasks.is_some() || self.topics.is_some()
    }

    fn to_filter(&self) -> EventFilter {
        let split = |s: &String| -> HashSet<String> {
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        };

        let event_types = self.types.as_ref().map(|s| {
            split(s)
                .into_iter()
                .filter_map(|name| {
                    serde_json::from_value::<EventKind>(serde_json::Value::from(name)).ok()
                })
                .collect::<HashSet<EventKind>>()
        });
        let task_ids = self.tasks.as_ref().map(|s| {
            split(s)
                .into_iter()
                .filter_map(|raw| Uuid::parse_str(&raw).ok())
                .collect::<HashSet<Uuid>>()
        });

        EventFilter {
            event_types,
            agent_names: self.agents.as_ref().map(split),
            task_ids,
            topics: self.topics.as_ref().map(split),
        }
    }
}

/// `GET /ws/notifications` — upgrade and register a subscription.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, params: WsParams) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let subscription_id = match params.subscription_id {
        Some(id) => {
            let filters = params.has_filters().then(|| params.to_filter());
            let flushed = state.notifier.resubscribe(id, tx.clone(), filters).await;
            debug!(subscription = %id, flushed, "subscriber resumed");
            id
        }
        None => state.notifier.subscribe(tx.clone(), params.to_filter()).await,
    };

    info!(subscription = %subscription_id, "websocket connected");

    let welcome = serde_json::json!({
        "type": "connected",
        "subscription_id": subscription_id,
    });
    if ws_sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    // Forward queued notifier payloads to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Read inbound frames; any traffic proves liveness.
    let notifier = state.notifier.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    notifier.record_heartbeat(subscription_id).await;
                    if text.as_str().trim().eq_ignore_ascii_case("ping") {
                        let _ = tx.send("pong".to_string());
                    }
                }
                Message::Pong(_) => {
                    notifier.record_heartbeat(subscription_id).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    // No explicit unsubscribe: a dead connection is retired by the next
    // failed send or heartbeat, keeping its backlog for resubscribe.
    info!(subscription = %subscription_id, "websocket disconnected");
}
