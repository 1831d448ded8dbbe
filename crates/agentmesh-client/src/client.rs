use crate::pool::ConnectionPool;
use crate::registry::{Endpoint, PortRegistry};
use agentmesh_core::{AgentRequest, AgentResponse, MeshError, MeshResult};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Path agents expose for wire-envelope calls.
const RPC_PATH: &str = "/rpc";
/// Path probed by [`ProtocolClient::health_check`].
const HEALTH_PATH: &str = "/health";

/// Retry behaviour for outbound agent calls.
///
/// The backoff curve is exponential (`retry_delay * 2^attempt`, capped at
/// `backoff_max`) with full jitter: the actual sleep is uniform over
/// `[0, delay]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Base delay seeding the exponential curve.
    pub retry_delay: Duration,
    /// Cap on the computed delay before jitter.
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Jittered delay before retry number `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.backoff_max);
        let ms = exp.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
    }
}

/// Pluggable response post-processor.
///
/// When supplied, a non-`None` return replaces the default-formatted
/// response; `None` lets the default formatting stand.
pub trait ResponseProcessor: Send + Sync {
    /// Transform the raw result payload, or decline with `None`.
    fn process(&self, raw: &serde_json::Value) -> Option<serde_json::Value>;
}

/// Outcome of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// The endpoint answered with a non-server-error response.
    Healthy,
    /// The endpoint was unreachable or answered with a server error.
    Unhealthy,
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Probe outcome.
    pub status: HealthStatus,
    /// Round-trip time of the probe.
    pub response_time_ms: u64,
    /// Failure description when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    /// Whether the probe found the endpoint healthy.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    fn unhealthy(elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: elapsed.as_millis() as u64,
            error: Some(error.into()),
        }
    }
}

/// Cumulative per-client counters since construction.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Logical requests issued (retries do not add to this).
    pub requests_sent: u64,
    /// Requests that ultimately succeeded.
    pub requests_successful: u64,
    /// Requests that ultimately failed.
    pub requests_failed: u64,
    /// Retry attempts performed across all requests.
    pub retries_performed: u64,
    /// `requests_successful / requests_sent`, as a percentage.
    pub success_rate_percent: f64,
    /// `retries_performed / requests_sent`.
    pub average_retries_per_request: f64,
}

/// RPC-style client for calling agents by name or endpoint.
///
/// Calls go through the [`ConnectionPool`]; transport failures and timeouts
/// are retried per [`RetryPolicy`], after which the last cause surfaces as
/// [`MeshError::Communication`]. Name resolution failures and malformed
/// response bodies are never retried.
pub struct ProtocolClient {
    registry: Arc<PortRegistry>,
    pool: Arc<ConnectionPool>,
    policy: RetryPolicy,
    default_timeout: Duration,
    service_name: String,
    processor: Option<Arc<dyn ResponseProcessor>>,
    next_id: AtomicU64,
    requests_sent: AtomicU64,
    requests_successful: AtomicU64,
    requests_failed: AtomicU64,
    retries_performed: AtomicU64,
}

impl ProtocolClient {
    /// Build a client over a registry and pool with default policy.
    pub fn new(registry: Arc<PortRegistry>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            registry,
            pool,
            policy: RetryPolicy::default(),
            default_timeout: Duration::from_secs(30),
            service_name: "agentmesh".to_string(),
            processor: None,
            next_id: AtomicU64::new(1),
            requests_sent: AtomicU64::new(0),
            requests_successful: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            retries_performed: AtomicU64::new(0),
        }
    }

    /// Override the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the default per-call timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the service name sent in the `x-agentmesh-service` header.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Install a response post-processor.
    pub fn with_processor(mut self, processor: Arc<dyn ResponseProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Resolve `agent_name` through the registry, then send.
    ///
    /// An unregistered name fails immediately with
    /// [`MeshError::AgentNotFound`] — resolution failures are not retried.
    pub async fn send_message_by_name(
        &self,
        agent_name: &str,
        message: serde_json::Value,
        metadata: HashMap<String, serde_json::Value>,
        timeout: Option<Duration>,
    ) -> MeshResult<serde_json::Value> {
        let endpoint = self.registry.resolve(agent_name)?;
        debug!(agent = agent_name, endpoint = %endpoint, "resolved agent");
        self.send_message(&endpoint, message, metadata, timeout, HashMap::new())
            .await
    }

    /// Send a wire-envelope request to `endpoint` with retry on transport failure.
    pub async fn send_message(
        &self,
        endpoint: &Endpoint,
        message: serde_json::Value,
        metadata: HashMap<String, serde_json::Value>,
        timeout: Option<Duration>,
        custom_headers: HashMap<String, String>,
    ) -> MeshResult<serde_json::Value> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = AgentRequest::execute(id, message, metadata);
        self.requests_sent.fetch_add(1, Ordering::Relaxed);

        let mut last_err: Option<MeshError> = None;
        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                self.retries_performed.fetch_add(1, Ordering::Relaxed);
                let delay = self.policy.backoff_delay(attempt - 1);
                info!(
                    endpoint = %endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying agent call"
                );
                tokio::time::sleep(delay).await;
            }

            match self
                .attempt_send(endpoint, &request, timeout, &custom_headers)
                .await
            {
                Ok(raw) => {
                    self.requests_successful.fetch_add(1, Ordering::Relaxed);
                    return Ok(self.format_response(raw));
                }
                Err(e @ (MeshError::ResponseFormat(_) | MeshError::PoolExhausted(_))) => {
                    // Retrying will not fix a malformed payload, and pool
                    // exhaustion is surfaced for the caller to decide.
                    self.requests_failed.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, attempt, error = %e, "agent call attempt failed");
                    last_err = Some(e);
                }
            }
        }

        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        let cause = last_err.map_or_else(|| "unknown".to_string(), |e| e.to_string());
        Err(MeshError::Communication(format!(
            "call to {endpoint} failed after {} retries: {cause}",
            self.policy.max_retries
        )))
    }

    async fn attempt_send(
        &self,
        endpoint: &Endpoint,
        request: &AgentRequest,
        timeout: Duration,
        custom_headers: &HashMap<String, String>,
    ) -> MeshResult<serde_json::Value> {
        let conn = self.pool.acquire(endpoint, timeout).await?;

        let url = format!("{}{RPC_PATH}", endpoint.base_url());
        let mut builder = conn
            .http()
            .post(&url)
            .timeout(timeout)
            .header("x-agentmesh-service", &self.service_name)
            .json(request);
        for (key, value) in custom_headers {
            builder = builder.header(key, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                MeshError::Communication(format!("timeout after {timeout:?} calling {url}"))
            } else {
                MeshError::Communication(format!("transport error calling {url}: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MeshError::Communication(format!(
                "HTTP {status} from {url}"
            )));
        }

        let envelope: AgentResponse = response
            .json()
            .await
            .map_err(|e| MeshError::ResponseFormat(format!("malformed response body: {e}")))?;
        envelope.into_result()
    }

    fn format_response(&self, raw: serde_json::Value) -> serde_json::Value {
        if let Some(processor) = &self.processor {
            if let Some(transformed) = processor.process(&raw) {
                return transformed;
            }
        }
        raw
    }

    /// Probe `endpoint`'s health path.
    ///
    /// Any HTTP answer short of a server error counts as healthy — a 404
    /// from a service without a dedicated liveness path still proves the
    /// process is up.
    pub async fn health_check(&self, endpoint: &Endpoint) -> HealthReport {
        let probe_timeout = Duration::from_secs(5).min(self.default_timeout);
        let start = Instant::now();

        let conn = match self.pool.acquire(endpoint, probe_timeout).await {
            Ok(conn) => conn,
            Err(e) => return HealthReport::unhealthy(start.elapsed(), e.to_string()),
        };

        let url = format!("{}{HEALTH_PATH}", endpoint.base_url());
        match conn.http().get(&url).timeout(probe_timeout).send().await {
            Ok(response) => {
                let elapsed = start.elapsed();
                let status = response.status();
                if status.is_server_error() {
                    HealthReport::unhealthy(elapsed, format!("HTTP {status}"))
                } else {
                    HealthReport {
                        status: HealthStatus::Healthy,
                        response_time_ms: elapsed.as_millis() as u64,
                        error: None,
                    }
                }
            }
            Err(e) => HealthReport::unhealthy(start.elapsed(), e.to_string()),
        }
    }

    /// Probe many agents concurrently.
    ///
    /// Every name gets a report: unresolvable names and failed probes are
    /// unhealthy entries, never an error for the batch.
    pub async fn batch_health_check(&self, agent_names: &[String]) -> HashMap<String, HealthReport> {
        let probes = agent_names.iter().map(|name| async move {
            let report = match self.registry.resolve(name) {
                Ok(endpoint) => self.health_check(&endpoint).await,
                Err(e) => HealthReport::unhealthy(Duration::ZERO, e.to_string()),
            };
            (name.clone(), report)
        });
        futures_util::future::join_all(probes).await.into_iter().collect()
    }

    /// Cumulative counters since construction (or the last reset).
    pub fn session_stats(&self) -> SessionStats {
        let sent = self.requests_sent.load(Ordering::Relaxed);
        let successful = self.requests_successful.load(Ordering::Relaxed);
        let failed = self.requests_failed.load(Ordering::Relaxed);
        let retries = self.retries_performed.load(Ordering::Relaxed);
        SessionStats {
            requests_sent: sent,
            requests_successful: successful,
            requests_failed: failed,
            retries_performed: retries,
            success_rate_percent: if sent == 0 {
                0.0
            } else {
                successful as f64 / sent as f64 * 100.0
            },
            average_retries_per_request: if sent == 0 {
                0.0
            } else {
                retries as f64 / sent as f64
            },
        }
    }

    /// Zero all session counters.
    pub fn reset_stats(&self) {
        self.requests_sent.store(0, Ordering::Relaxed);
        self.requests_successful.store(0, Ordering::Relaxed);
        self.requests_failed.store(0, Ordering::Relaxed);
        self.retries_performed.store(0, Ordering::Relaxed);
    }
}
