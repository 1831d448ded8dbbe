use crate::snapshot;
use agentmesh_core::{MeshResult, TaskPatch, TaskRecord, TaskStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for a [`TaskStore`].
#[derive(Debug, Clone)]
pub struct TaskStoreConfig {
    /// Capacity cap; creating past it evicts the least-recently-accessed task.
    pub max_tasks: usize,
    /// Cadence of the background expiry sweep.
    pub sweep_interval: Duration,
    /// Snapshot file; `None` disables disk snapshotting.
    pub snapshot_path: Option<PathBuf>,
    /// Cadence of periodic snapshots (only with `snapshot_path`).
    pub snapshot_interval: Duration,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        Self {
            max_tasks: 1000,
            sweep_interval: Duration::from_secs(60),
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(300),
        }
    }
}

/// Filters and pagination for [`TaskStore::list_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only tasks in this status.
    pub status: Option<TaskStatus>,
    /// Only tasks for this agent.
    pub agent_name: Option<String>,
    /// Page size; `None` returns everything after `offset`.
    pub limit: Option<usize>,
    /// Records to skip (newest first).
    pub offset: usize,
}

/// Counters reported on the gateway health surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskStoreStats {
    /// Records currently held.
    pub total_tasks: usize,
    /// Capacity cap.
    pub max_tasks: usize,
    /// Records per status.
    pub by_status: HashMap<String, usize>,
    /// Whether disk snapshotting is enabled.
    pub snapshot_enabled: bool,
}

struct Entry {
    record: TaskRecord,
    last_access: u64,
}

struct Table {
    entries: HashMap<Uuid, Entry>,
    // Monotonic access clock; wall-clock ties would scramble LRU order.
    clock: u64,
}

impl Table {
    fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Durable-in-memory record of every orchestration task's lifecycle.
///
/// All reads and writes for the table go through one mutex, so no caller
/// ever observes a partially-applied update. Expired records are removed by
/// a background sweep and also treated as absent on read, whichever comes
/// first.
pub struct TaskStore {
    table: Arc<Mutex<Table>>,
    config: TaskStoreConfig,
    cancel: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskStore {
    /// Build a store without background loops (used directly in tests).
    pub fn new(config: TaskStoreConfig) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                entries: HashMap::new(),
                clock: 0,
            })),
            config,
            cancel: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Build a store, load any snapshot, and start the background loops.
    pub async fn open(config: TaskStoreConfig) -> MeshResult<Self> {
        let store = Self::new(config);
        if let Some(path) = &store.config.snapshot_path {
            let records = snapshot::load_snapshot(path).await?;
            let mut table = store.table.lock().await;
            for record in records {
                let stamp = table.touch();
                table.entries.insert(
                    record.id,
                    Entry {
                        record,
                        last_access: stamp,
                    },
                );
            }
            info!(tasks = table.entries.len(), "task store restored from snapshot");
        }
        store.spawn_loops().await;
        Ok(store)
    }

    async fn spawn_loops(&self) {
        let mut loops = self.loops.lock().await;

        let table = self.table.clone();
        let token = self.cancel.clone();
        let sweep_interval = self.config.sweep_interval;
        loops.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let mut table = table.lock().await;
                        let before = table.entries.len();
                        table.entries.retain(|_, e| !e.record.is_expired(now));
                        let removed = before - table.entries.len();
                        if removed > 0 {
                            debug!(removed, "swept expired tasks");
                        }
                    }
                }
            }
        }));

        if let Some(path) = self.config.snapshot_path.clone() {
            let table = self.table.clone();
            let token = self.cancel.clone();
            let snapshot_interval = self.config.snapshot_interval;
            loops.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(snapshot_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let records: Vec<TaskRecord> = {
                                let table = table.lock().await;
                                table.entries.values().map(|e| e.record.clone()).collect()
                            };
                            if let Err(e) = snapshot::write_snapshot(&path, &records).await {
                                warn!(error = %e, "periodic snapshot failed");
                            }
                        }
                    }
                }
            }));
        }
    }

    /// Insert a task, evicting the least-recently-accessed record at capacity.
    pub async fn create_task(&self, record: TaskRecord) -> MeshResult<Uuid> {
        let id = record.id;
        let mut table = self.table.lock().await;

        if table.entries.len() >= self.config.max_tasks {
            // Eviction is a capacity policy, not a correctness guarantee:
            // the victim's status is irrelevant.
            if let Some(victim) = table
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(id, _)| *id)
            {
                table.entries.remove(&victim);
                debug!(evicted = %victim, "evicted least-recently-accessed task");
            }
        }

        let stamp = table.touch();
        table.entries.insert(
            id,
            Entry {
                record,
                last_access: stamp,
            },
        );
        Ok(id)
    }

    /// Fetch a task, treating expired records as absent.
    pub async fn get_task(&self, id: Uuid) -> Option<TaskRecord> {
        let mut table = self.table.lock().await;
        let expired = match table.entries.get(&id) {
            Some(entry) => entry.record.is_expired(Utc::now()),
            None => return None,
        };
        if expired {
            table.entries.remove(&id);
            return None;
        }
        let stamp = table.touch();
        let entry = table.entries.get_mut(&id)?;
        entry.last_access = stamp;
        Some(entry.record.clone())
    }

    /// Apply a partial update.
    ///
    /// Returns `Ok(false)` for a missing or expired id; an illegal status
    /// transition is an error and leaves the record untouched.
    pub async fn update_task(&self, id: Uuid, patch: TaskPatch) -> MeshResult<bool> {
        let mut table = self.table.lock().await;
        let expired = match table.entries.get(&id) {
            Some(entry) => entry.record.is_expired(Utc::now()),
            None => return Ok(false),
        };
        if expired {
            table.entries.remove(&id);
            return Ok(false);
        }
        let stamp = table.touch();
        let entry = match table.entries.get_mut(&id) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        entry.record.apply(patch)?;
        entry.last_access = stamp;
        Ok(true)
    }

    /// Remove a task. Returns whether a record was present.
    pub async fn delete_task(&self, id: Uuid) -> bool {
        self.table.lock().await.entries.remove(&id).is_some()
    }

    /// List tasks newest-first with filters and pagination.
    ///
    /// Expired records encountered during the scan are dropped, not listed.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<TaskRecord> {
        let now = Utc::now();
        let mut table = self.table.lock().await;
        table.entries.retain(|_, e| !e.record.is_expired(now));

        let mut records: Vec<TaskRecord> = table
            .entries
            .values()
            .map(|e| &e.record)
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| {
                filter
                    .agent_name
                    .as_deref()
                    .map_or(true, |a| r.agent_name == a)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = filter.offset.min(records.len());
        let mut page = records.split_off(offset);
        if let Some(limit) = filter.limit {
            page.truncate(limit);
        }
        page
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        let table = self.table.lock().await;
        table
            .entries
            .values()
            .filter(|e| !e.record.is_expired(now))
            .count()
    }

    /// Whether the store holds no live records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stats for the gateway health surface.
    pub async fn stats(&self) -> TaskStoreStats {
        let table = self.table.lock().await;
        let mut by_status: HashMap<String, usize> = HashMap::new();
        for entry in table.entries.values() {
            *by_status.entry(entry.record.status.to_string()).or_insert(0) += 1;
        }
        TaskStoreStats {
            total_tasks: table.entries.len(),
            max_tasks: self.config.max_tasks,
            by_status,
            snapshot_enabled: self.config.snapshot_path.is_some(),
        }
    }

    /// Write a snapshot now, if snapshotting is configured.
    pub async fn snapshot_now(&self) -> MeshResult<()> {
        let Some(path) = &self.config.snapshot_path else {
            return Ok(());
        };
        let records: Vec<TaskRecord> = {
            let table = self.table.lock().await;
            table.entries.values().map(|e| e.record.clone()).collect()
        };
        snapshot::write_snapshot(path, &records).await
    }

    /// Stop the background loops and write a final snapshot.
    pub async fn shutdown(&self) -> MeshResult<()> {
        self.cancel.cancel();
        let mut loops = self.loops.lock().await;
        for handle in loops.drain(..) {
            let _ = handle.await;
        }
        self.snapshot_now().await?;
        info!("task store shut down");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn record(agent: &str, ttl_secs: i64) -> TaskRecord {
        TaskRecord::new(
            agent,
            serde_json::json!("query"),
            ChronoDuration::seconds(ttl_secs),
        )
    }

    fn store(max_tasks: usize) -> TaskStore {
        TaskStore::new(TaskStoreConfig {
            max_tasks,
            ..TaskStoreConfig::default()
        })
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store(10);
        let task = record("echo", 60);
        let id = store.create_task(task.clone()).await.unwrap();

        let fetched = store.get_task(id).await.unwrap();
        assert_eq!(fetched.agent_name, "echo");
        assert_eq!(fetched.query, task.query);
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.created_at, task.created_at);
    }

    #[tokio::test]
    async fn update_missing_id_returns_false() {
        let store = store(10);
        let updated = store
            .update_task(Uuid::new_v4(), TaskPatch::status(TaskStatus::Running))
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn update_applies_under_the_lock() {
        let store = store(10);
        let id = store.create_task(record("echo", 60)).await.unwrap();

        assert!(store
            .update_task(id, TaskPatch::status(TaskStatus::Running))
            .await
            .unwrap());
        assert!(store
            .update_task(id, TaskPatch::completed(serde_json::json!("pong")))
            .await
            .unwrap());

        let task = store.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!("pong")));
    }

    #[tokio::test]
    async fn illegal_transition_is_an_error_and_leaves_record_intact() {
        let store = store(10);
        let id = store.create_task(record("echo", 60)).await.unwrap();

        let err = store
            .update_task(id, TaskPatch::completed(serde_json::json!(1)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("illegal status transition"));
        assert_eq!(store.get_task(id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn expired_task_is_absent_on_read_without_sweep() {
        let store = store(10);
        let mut task = record("echo", 60);
        task.expires_at = Utc::now() - ChronoDuration::seconds(1);
        let id = store.create_task(task).await.unwrap();

        assert!(store.get_task(id).await.is_none());
        // The lazy read also dropped the record.
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn expired_task_is_invisible_to_update_and_list() {
        let store = store(10);
        let mut task = record("echo", 60);
        task.expires_at = Utc::now() - ChronoDuration::seconds(1);
        let id = store.create_task(task).await.unwrap();

        assert!(!store
            .update_task(id, TaskPatch::status(TaskStatus::Running))
            .await
            .unwrap());
        assert!(store.list_tasks(&TaskFilter::default()).await.is_empty());
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_accessed() {
        let store = store(3);
        let a = store.create_task(record("a", 60)).await.unwrap();
        let b = store.create_task(record("b", 60)).await.unwrap();
        let c = store.create_task(record("c", 60)).await.unwrap();

        // Touch a and b; c becomes the LRU victim.
        store.get_task(a).await.unwrap();
        store.get_task(b).await.unwrap();

        let d = store.create_task(record("d", 60)).await.unwrap();
        assert_eq!(store.len().await, 3);
        assert!(store.get_task(c).await.is_none());
        assert!(store.get_task(a).await.is_some());
        assert!(store.get_task(b).await.is_some());
        assert!(store.get_task(d).await.is_some());
    }

    #[tokio::test]
    async fn capacity_overflow_evicts_exactly_one() {
        let store = store(5);
        let first = store.create_task(record("first", 60)).await.unwrap();
        for i in 0..4 {
            store.create_task(record(&format!("n{i}"), 60)).await.unwrap();
        }
        store.create_task(record("overflow", 60)).await.unwrap();

        assert_eq!(store.len().await, 5);
        // The untouched first insert was the least recently accessed.
        assert!(store.get_task(first).await.is_none());
    }

    #[tokio::test]
    async fn list_filters_and_paginates_newest_first() {
        let store = store(10);
        for i in 0..3 {
            let mut t = record("scraper", 60);
            t.created_at = Utc::now() + ChronoDuration::milliseconds(i);
            store.create_task(t).await.unwrap();
        }
        let other = store.create_task(record("writer", 60)).await.unwrap();
        store
            .update_task(other, TaskPatch::status(TaskStatus::Running))
            .await
            .unwrap();

        let scraped = store
            .list_tasks(&TaskFilter {
                agent_name: Some("scraper".into()),
                ..TaskFilter::default()
            })
            .await;
        assert_eq!(scraped.len(), 3);
        assert!(scraped.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let running = store
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Running),
                ..TaskFilter::default()
            })
            .await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, other);

        let page = store
            .list_tasks(&TaskFilter {
                limit: Some(2),
                offset: 1,
                ..TaskFilter::default()
            })
            .await;
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn delete_task_reports_presence() {
        let store = store(10);
        let id = store.create_task(record("echo", 60)).await.unwrap();
        assert!(store.delete_task(id).await);
        assert!(!store.delete_task(id).await);
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let store = store(10);
        let id = store.create_task(record("echo", 60)).await.unwrap();
        store
            .update_task(id, TaskPatch::status(TaskStatus::Running))
            .await
            .unwrap();
        store.create_task(record("echo", 60)).await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.by_status["running"], 1);
        assert_eq!(stats.by_status["pending"], 1);
    }
}
