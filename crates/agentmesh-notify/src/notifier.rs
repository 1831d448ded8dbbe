use crate::filter::EventFilter;
use agentmesh_core::MeshEvent;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for the [`PushNotifier`].
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Bound on each retired subscriber's backlog; oldest dropped past it.
    pub max_backlog: usize,
    /// How long a retired subscriber's backlog is retained for resubscribe.
    pub backlog_ttl: Duration,
    /// Cadence of the heartbeat probe loop.
    pub heartbeat_interval: Duration,
    /// Heartbeat silence tolerated before a subscription is torn down.
    pub heartbeat_timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_backlog: 100,
            backlog_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// A live notification-channel consumer, owned exclusively by the notifier.
pub struct Subscription {
    /// Subscription id; also the resubscribe key.
    pub id: Uuid,
    /// Transport handle: serialized events are pushed into this sender.
    pub tx: mpsc::UnboundedSender<String>,
    /// Delivery predicate.
    pub filters: EventFilter,
    /// When the subscription was registered.
    pub created_at: DateTime<Utc>,
    /// Last time the peer proved liveness.
    pub last_heartbeat: DateTime<Utc>,
}

struct Backlog {
    events: VecDeque<String>,
    filters: EventFilter,
    retired_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<Uuid, Subscription>,
    backlogs: HashMap<Uuid, Backlog>,
}

/// Counters reported on the gateway health surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NotifierStats {
    /// Live subscriptions.
    pub active_subscriptions: usize,
    /// Retired subscribers with a retained backlog.
    pub retained_backlogs: usize,
    /// Events queued across all backlogs.
    pub queued_events: usize,
}

/// Manages live subscriber connections and event delivery.
///
/// `notify` evaluates each subscription's filter before sending; a failed
/// send retires the subscription and queues the event in a bounded FIFO
/// that a resubscriber with the same id can drain within the TTL window.
/// A heartbeat loop tears down subscriptions that go silent.
pub struct PushNotifier {
    inner: std::sync::Arc<Mutex<Inner>>,
    config: NotifierConfig,
    cancel: CancellationToken,
    heartbeat_loop: Mutex<Option<JoinHandle<()>>>,
}

impl PushNotifier {
    /// Build a notifier without the heartbeat loop (used directly in tests).
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner::default())),
            config,
            cancel: CancellationToken::new(),
            heartbeat_loop: Mutex::new(None),
        }
    }

    /// Start the heartbeat loop.
    pub async fn start(&self) {
        let token = self.cancel.clone();
        let interval = self.config.heartbeat_interval;
        let inner = self.inner.clone();
        let config = self.config.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => heartbeat_sweep(&inner, &config).await,
                }
            }
        });
        *self.heartbeat_loop.lock().await = Some(handle);
    }

    /// Register a subscriber. Returns the subscription id.
    pub async fn subscribe(
        &self,
        tx: mpsc::UnboundedSender<String>,
        filters: EventFilter,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner.subscriptions.insert(
            id,
            Subscription {
                id,
                tx,
                filters,
                created_at: now,
                last_heartbeat: now,
            },
        );
        debug!(subscription = %id, "subscriber registered");
        id
    }

    /// Re-register under a previous id, draining any retained backlog FIFO.
    ///
    /// Returns the number of backlog events flushed. Outside the TTL window
    /// the backlog is gone and this is an ordinary subscribe under `id`.
    pub async fn resubscribe(
        &self,
        id: Uuid,
        tx: mpsc::UnboundedSender<String>,
        filters: Option<EventFilter>,
    ) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let (filters, flushed) = match inner.backlogs.remove(&id) {
            Some(mut backlog) => {
                let mut flushed = 0;
                while let Some(event) = backlog.events.pop_front() {
                    if tx.send(event.clone()).is_err() {
                        // Dead on arrival: retain what was not delivered.
                        backlog.events.push_front(event);
                        inner.backlogs.insert(id, backlog);
                        return flushed;
                    }
                    flushed += 1;
                }
                (filters.unwrap_or(backlog.filters), flushed)
            }
            None => (filters.unwrap_or_default(), 0),
        };

        inner.subscriptions.insert(
            id,
            Subscription {
                id,
                tx,
                filters,
                created_at: now,
                last_heartbeat: now,
            },
        );
        if flushed > 0 {
            info!(subscription = %id, flushed, "backlog flushed on resubscribe");
        }
        flushed
    }

    /// Remove a subscription and discard any retained backlog.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        inner.backlogs.remove(&id);
        let removed = inner.subscriptions.remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "subscriber removed");
        }
        removed
    }

    /// Record that the peer behind `id` proved liveness.
    pub async fn record_heartbeat(&self, id: Uuid) {
        let mut inner = self.inner.lock().await;
        if let Some(sub) = inner.subscriptions.get_mut(&id) {
            sub.last_heartbeat = Utc::now();
        }
    }

    /// Broadcast `event` to every matching subscriber.
    ///
    /// Non-matching subscribers are skipped without error; zero matches is
    /// not an error. Returns the number of successful sends.
    pub async fn notify(&self, event: &MeshEvent) -> usize {
        self.deliver(event, None).await
    }

    /// Broadcast `event` to subscribers of `topic` whose filter also matches.
    pub async fn notify_topic(&self, topic: &str, event: &MeshEvent) -> usize {
        self.deliver(event, Some(topic)).await
    }

    async fn deliver(&self, event: &MeshEvent, topic: Option<&str>) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "dropping unserializable event");
                return 0;
            }
        };

        let mut inner = self.inner.lock().await;
        let mut delivered = 0;
        let mut dead: Vec<Uuid> = Vec::new();

        for (id, sub) in &inner.subscriptions {
            if let Some(topic) = topic {
                if !sub.filters.subscribed_to(topic) {
                    continue;
                }
            }
            if !sub.filters.matches(event) {
                continue;
            }
            if sub.tx.send(payload.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        // Retire first so the failed event lands in the fresh backlog below.
        for id in dead {
            retire(&mut inner, id);
        }

        // Temporarily unreachable subscribers keep accumulating matching
        // events (bounded) until they resubscribe or their TTL lapses.
        let max_backlog = self.config.max_backlog;
        for backlog in inner.backlogs.values_mut() {
            if topic.is_some_and(|t| !backlog.filters.subscribed_to(t)) {
                continue;
            }
            if !backlog.filters.matches(event) {
                continue;
            }
            if backlog.events.len() >= max_backlog {
                backlog.events.pop_front();
            }
            backlog.events.push_back(payload.clone());
        }
        delivered
    }

    /// One heartbeat pass: probe every subscription, tear down the silent
    /// ones, and discard backlogs past their TTL.
    pub async fn heartbeat_pass(&self) {
        heartbeat_sweep(&self.inner, &self.config).await;
    }

    /// Stats for the gateway health surface.
    pub async fn stats(&self) -> NotifierStats {
        let inner = self.inner.lock().await;
        NotifierStats {
            active_subscriptions: inner.subscriptions.len(),
            retained_backlogs: inner.backlogs.len(),
            queued_events: inner.backlogs.values().map(|b| b.events.len()).sum(),
        }
    }

    /// Stop the heartbeat loop and drop all subscriptions.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.heartbeat_loop.lock().await.take() {
            let _ = handle.await;
        }
        let mut inner = self.inner.lock().await;
        inner.subscriptions.clear();
        inner.backlogs.clear();
        info!("push notifier shut down");
    }
}

/// Retire a dead subscription, retaining its backlog for resubscribe.
fn retire(inner: &mut Inner, id: Uuid) {
    let Some(sub) = inner.subscriptions.remove(&id) else {
        return;
    };
    warn!(subscription = %id, "subscriber unreachable, retiring");

    inner.backlogs.entry(id).or_insert_with(|| Backlog {
        events: VecDeque::new(),
        filters: sub.filters,
        retired_at: Utc::now(),
    });
}

/// Probe every subscription, tear down the silent ones, and discard
/// backlogs past their TTL.
async fn heartbeat_sweep(inner: &Mutex<Inner>, config: &NotifierConfig) {
    let now = Utc::now();
    let timeout = chrono::Duration::from_std(config.heartbeat_timeout)
        .unwrap_or_else(|_| chrono::Duration::seconds(90));
    let backlog_ttl = chrono::Duration::from_std(config.backlog_ttl)
        .unwrap_or_else(|_| chrono::Duration::seconds(60));

    let mut inner = inner.lock().await;

    let probe = serde_json::json!({"type": "ping"}).to_string();
    let mut dead: Vec<Uuid> = Vec::new();
    for (id, sub) in &inner.subscriptions {
        if now - sub.last_heartbeat > timeout {
            debug!(subscription = %id, "heartbeat timed out");
            dead.push(*id);
        } else if sub.tx.send(probe.clone()).is_err() {
            dead.push(*id);
        }
    }
    for id in dead {
        retire(&mut inner, id);
    }

    inner
        .backlogs
        .retain(|_, b| now - b.retired_at <= backlog_ttl);
}
