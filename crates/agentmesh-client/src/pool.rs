use crate::registry::Endpoint;
use agentmesh_core::{MeshError, MeshResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Configuration for the [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on concurrent connections per host.
    pub max_per_host: usize,
    /// How long an idle keep-alive connection is retained.
    pub idle_timeout: Duration,
    /// TCP connect timeout for new connections.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_host: 8,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A checked-out connection. Dropping the guard returns the slot to the pool.
#[derive(Debug)]
pub struct PooledConnection {
    http: reqwest::Client,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// The HTTP client backing this connection slot.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// Bounded keep-alive connection pool.
///
/// Enforces a hard per-host cap via semaphore permits over a shared
/// keep-alive HTTP client. Callers wait for a free slot bounded by their own
/// timeout and receive [`MeshError::PoolExhausted`] on expiry — a request is
/// never silently dropped.
pub struct ConnectionPool {
    http: reqwest::Client,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
    config: PoolConfig,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Build a pool with the given configuration.
    pub fn new(config: PoolConfig) -> MeshResult<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_per_host)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| MeshError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            hosts: Mutex::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn semaphore_for(&self, authority: &str) -> Arc<Semaphore> {
        let mut hosts = self.hosts.lock();
        hosts
            .entry(authority.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_per_host)))
            .clone()
    }

    /// Check out a connection slot for `endpoint`, waiting at most `wait_timeout`.
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
        wait_timeout: Duration,
    ) -> MeshResult<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MeshError::PoolExhausted("pool is closed".to_string()));
        }

        let authority = endpoint.authority();
        let semaphore = self.semaphore_for(&authority);

        let permit = tokio::time::timeout(wait_timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| {
                MeshError::PoolExhausted(format!(
                    "no free connection to {authority} within {wait_timeout:?} (cap {})",
                    self.config.max_per_host
                ))
            })?
            .map_err(|_| MeshError::PoolExhausted(format!("pool closed for {authority}")))?;

        if self.closed.load(Ordering::Acquire) {
            return Err(MeshError::PoolExhausted("pool is closed".to_string()));
        }

        Ok(PooledConnection {
            http: self.http.clone(),
            _permit: permit,
        })
    }

    /// Close the pool: in-flight guards finish, new acquires fail fast.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let hosts = self.hosts.lock();
        for semaphore in hosts.values() {
            semaphore.close();
        }
        tracing::info!("connection pool closed");
    }

    /// Free slots currently available for `endpoint`'s host.
    pub fn available_permits(&self, endpoint: &Endpoint) -> usize {
        self.semaphore_for(&endpoint.authority()).available_permits()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn small_pool() -> ConnectionPool {
        ConnectionPool::new(PoolConfig {
            max_per_host: 2,
            ..PoolConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn acquire_and_release_cycles_permits() {
        let pool = small_pool();
        let ep = Endpoint::new("127.0.0.1", 8000);

        let a = pool.acquire(&ep, Duration::from_millis(50)).await.unwrap();
        let _b = pool.acquire(&ep, Duration::from_millis(50)).await.unwrap();
        assert_eq!(pool.available_permits(&ep), 0);

        drop(a);
        assert_eq!(pool.available_permits(&ep), 1);
        let _c = pool.acquire(&ep, Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_with_pool_exhausted() {
        let pool = small_pool();
        let ep = Endpoint::new("127.0.0.1", 8000);

        let _a = pool.acquire(&ep, Duration::from_millis(50)).await.unwrap();
        let _b = pool.acquire(&ep, Duration::from_millis(50)).await.unwrap();

        let err = pool
            .acquire(&ep, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::PoolExhausted(_)));
    }

    #[tokio::test]
    async fn caps_are_per_host() {
        let pool = small_pool();
        let a = Endpoint::new("127.0.0.1", 8000);
        let b = Endpoint::new("127.0.0.1", 8001);

        let _a1 = pool.acquire(&a, Duration::from_millis(50)).await.unwrap();
        let _a2 = pool.acquire(&a, Duration::from_millis(50)).await.unwrap();
        // Different port = different host key; still has free slots.
        let _b1 = pool.acquire(&b, Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquire() {
        let pool = small_pool();
        let ep = Endpoint::new("127.0.0.1", 8000);

        pool.close();
        let err = pool
            .acquire(&ep, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::PoolExhausted(_)));
    }

    #[tokio::test]
    async fn waiter_gets_slot_when_one_frees_up() {
        let pool = Arc::new(small_pool());
        let ep = Endpoint::new("127.0.0.1", 8000);

        let a = pool.acquire(&ep, Duration::from_millis(50)).await.unwrap();
        let _b = pool.acquire(&ep, Duration::from_millis(50)).await.unwrap();

        let pool2 = pool.clone();
        let ep2 = ep.clone();
        let waiter = tokio::spawn(async move {
            pool2.acquire(&ep2, Duration::from_secs(2)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(a);

        let got = waiter.await.unwrap();
        assert!(got.is_ok());
    }
}
