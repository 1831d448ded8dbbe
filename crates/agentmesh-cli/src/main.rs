//! AgentMesh binary: loads configuration, constructs every component
//! explicitly, and runs the gateway until shutdown.

use agentmesh_client::{
    ConnectionPool, Endpoint, PoolConfig, PortRegistry, ProtocolClient, RetryPolicy,
};
use agentmesh_gateway::GatewayServer;
use agentmesh_notify::{NotifierConfig, PushNotifier};
use agentmesh_orchestrator::{
    EchoAgent, Engine, EngineConfig, EventBus, HandlerRegistry, RemoteAgent,
};
use agentmesh_quality::QualityDomain;
use agentmesh_tasks::{TaskStore, TaskStoreConfig};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentmesh", about = "AgentMesh — agent orchestration runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentmesh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Probe every registered agent concurrently and print the results
    Health,
    /// List registered agents and their endpoints
    Agents,
}

#[derive(Deserialize, Default)]
struct MeshConfig {
    #[serde(default = "default_service_name")]
    service_name: String,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    client: ClientConfig,
    #[serde(default)]
    tasks: TasksConfig,
    #[serde(default)]
    notifier: NotifierSection,
    #[serde(default)]
    quality: QualitySection,
    /// Logical agent name → `host:port`.
    #[serde(default)]
    agents: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize)]
struct ClientConfig {
    #[serde(default = "default_timeout_secs")]
    default_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,
    #[serde(default = "default_max_per_host")]
    max_connections_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_connections_per_host: default_max_per_host(),
        }
    }
}

#[derive(Deserialize)]
struct TasksConfig {
    #[serde(default = "default_ttl_secs")]
    ttl_secs: u64,
    #[serde(default = "default_max_tasks")]
    max_tasks: usize,
    #[serde(default = "default_sweep_secs")]
    sweep_interval_secs: u64,
    #[serde(default)]
    snapshot_path: Option<PathBuf>,
    #[serde(default = "default_snapshot_secs")]
    snapshot_interval_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_tasks: default_max_tasks(),
            sweep_interval_secs: default_sweep_secs(),
            snapshot_path: None,
            snapshot_interval_secs: default_snapshot_secs(),
        }
    }
}

#[derive(Deserialize)]
struct NotifierSection {
    #[serde(default = "default_max_backlog")]
    max_backlog: usize,
    #[serde(default = "default_backlog_ttl_secs")]
    backlog_ttl_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    heartbeat_timeout_secs: u64,
}

impl Default for NotifierSection {
    fn default() -> Self {
        Self {
            max_backlog: default_max_backlog(),
            backlog_ttl_secs: default_backlog_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Default)]
struct QualitySection {
    #[serde(default)]
    domain: Option<QualityDomain>,
    #[serde(default)]
    strict: bool,
}

fn default_service_name() -> String {
    "agentmesh".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_max_per_host() -> usize {
    8
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_max_tasks() -> usize {
    1000
}
fn default_sweep_secs() -> u64 {
    60
}
fn default_snapshot_secs() -> u64 {
    300
}
fn default_max_backlog() -> usize {
    100
}
fn default_backlog_ttl_secs() -> u64 {
    60
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_heartbeat_timeout_secs() -> u64 {
    90
}

fn build_registry(config: &MeshConfig) -> anyhow::Result<Arc<PortRegistry>> {
    let mut table = HashMap::new();
    for (name, raw) in &config.agents {
        let endpoint = Endpoint::parse(raw)
            .map_err(|e| anyhow::anyhow!("agent '{name}': {e}"))?;
        table.insert(name.clone(), endpoint);
    }
    Ok(Arc::new(PortRegistry::with_overrides(table, HashMap::new())))
}

fn build_client(config: &MeshConfig, registry: Arc<PortRegistry>) -> anyhow::Result<Arc<ProtocolClient>> {
    let pool = Arc::new(ConnectionPool::new(PoolConfig {
        max_per_host: config.client.max_connections_per_host,
        ..PoolConfig::default()
    })?);
    let client = ProtocolClient::new(registry, pool)
        .with_policy(RetryPolicy {
            max_retries: config.client.max_retries,
            retry_delay: Duration::from_millis(config.client.retry_delay_ms),
            ..RetryPolicy::default()
        })
        .with_default_timeout(Duration::from_secs(config.client.default_timeout_secs))
        .with_service_name(&config.service_name);
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config: MeshConfig = match tokio::fs::read_to_string(&cli.config).await {
        Ok(raw) => toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", cli.config.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %cli.config.display(), "no config file, using defaults");
            MeshConfig::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to read config {}: {e}",
                cli.config.display()
            ))
        }
    };

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Health => health(config).await,
        Commands::Agents => {
            let registry = build_registry(&config)?;
            for (name, endpoint) in registry.endpoints() {
                println!("{name}\t{endpoint}");
            }
            Ok(())
        }
    }
}

async fn health(config: MeshConfig) -> anyhow::Result<()> {
    let registry = build_registry(&config)?;
    let client = build_client(&config, registry.clone())?;

    let names: Vec<String> = registry.endpoints().into_iter().map(|(name, _)| name).collect();
    let reports = client.batch_health_check(&names).await;
    for (name, report) in &reports {
        println!("{name}\t{}", serde_json::to_string(report)?);
    }
    Ok(())
}

async fn serve(config: MeshConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let registry = build_registry(&config)?;
    let client = build_client(&config, registry.clone())?;

    // Typed handler registry: remote specialists plus the built-in echo.
    let mut handlers = HandlerRegistry::new();
    handlers.register("echo", Arc::new(EchoAgent));
    for (name, _) in registry.endpoints() {
        handlers.register(&name, Arc::new(RemoteAgent::new(client.clone(), &name)));
    }
    info!(agents = handlers.names().len(), "handler registry built");

    let store = Arc::new(
        TaskStore::open(TaskStoreConfig {
            max_tasks: config.tasks.max_tasks,
            sweep_interval: Duration::from_secs(config.tasks.sweep_interval_secs),
            snapshot_path: config.tasks.snapshot_path.clone(),
            snapshot_interval: Duration::from_secs(config.tasks.snapshot_interval_secs),
        })
        .await?,
    );

    let notifier = Arc::new(PushNotifier::new(NotifierConfig {
        max_backlog: config.notifier.max_backlog,
        backlog_ttl: Duration::from_secs(config.notifier.backlog_ttl_secs),
        heartbeat_interval: Duration::from_secs(config.notifier.heartbeat_interval_secs),
        heartbeat_timeout: Duration::from_secs(config.notifier.heartbeat_timeout_secs),
    }));
    notifier.start().await;

    let events = EventBus::new(256);
    let shutdown = CancellationToken::new();
    let bridge = events.spawn_notifier_bridge(notifier.clone(), shutdown.clone());
    let logger = events.spawn_logger(shutdown.clone());

    let engine = Arc::new(Engine::new(
        Arc::new(handlers),
        store.clone(),
        events,
        EngineConfig {
            task_ttl: Duration::from_secs(config.tasks.ttl_secs),
            call_timeout: Duration::from_secs(config.client.default_timeout_secs),
            quality_domain: config.quality.domain.unwrap_or(QualityDomain::Generic),
            strict_quality: config.quality.strict,
        },
    ));

    let app = GatewayServer::build(engine, notifier.clone());

    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!(host = %host, port, service = %config.service_name, "gateway listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await?;

    // Orderly teardown: event consumers, notifier, then the store (which
    // writes its final snapshot).
    shutdown.cancel();
    let _ = bridge.await;
    let _ = logger.await;
    notifier.shutdown().await;
    store.shutdown().await?;
    info!("shutdown complete");
    Ok(())
}
