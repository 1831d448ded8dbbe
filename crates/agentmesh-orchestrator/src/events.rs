use agentmesh_core::{EventKind, MeshEvent};
use agentmesh_notify::PushNotifier;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Broadcast channel for progress events.
///
/// Producers emit without knowing who listens; the push notifier bridge and
/// the tracing logger are independent consumers, so who reports progress is
/// decoupled from who delivers it.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MeshEvent>,
}

impl EventBus {
    /// A bus retaining up to `capacity` undelivered events per consumer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event. Fine to call with no consumers attached.
    pub fn emit(&self, event: MeshEvent) {
        let _ = self.tx.send(event);
    }

    /// Attach a raw consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    /// Spawn the consumer forwarding every event to the push notifier.
    pub fn spawn_notifier_bridge(
        &self,
        notifier: Arc<PushNotifier>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            notifier.notify(&event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "notifier bridge lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Spawn the consumer logging every event.
    pub fn spawn_logger(&self, token: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => log_event(&event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "event logger lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

fn log_event(event: &MeshEvent) {
    let task = event
        .task_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let agent = event.agent_name.as_deref().unwrap_or("-");
    match event.kind {
        EventKind::TaskFailed => {
            warn!(kind = %event.kind, task = %task, agent, "progress event");
        }
        _ => {
            info!(kind = %event.kind, task = %task, agent, "progress event");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use agentmesh_notify::{EventFilter, NotifierConfig};
    use uuid::Uuid;

    #[tokio::test]
    async fn emit_without_consumers_is_fine() {
        let bus = EventBus::new(16);
        bus.emit(MeshEvent::new(EventKind::WaveStarted));
    }

    #[tokio::test]
    async fn bridge_forwards_events_to_subscribers() {
        let bus = EventBus::new(16);
        let notifier = Arc::new(PushNotifier::new(NotifierConfig::default()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        notifier.subscribe(tx, EventFilter::match_all()).await;

        let token = CancellationToken::new();
        let bridge = bus.spawn_notifier_bridge(notifier.clone(), token.clone());

        bus.emit(MeshEvent::for_task(
            EventKind::TaskStarted,
            Uuid::new_v4(),
            "research",
        ));

        let delivered = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&delivered).unwrap();
        assert_eq!(json["type"], "task_started");

        token.cancel();
        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn independent_consumers_each_see_every_event() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(MeshEvent::new(EventKind::WaveFinished));

        assert_eq!(a.recv().await.unwrap().kind, EventKind::WaveFinished);
        assert_eq!(b.recv().await.unwrap().kind, EventKind::WaveFinished);
    }
}
