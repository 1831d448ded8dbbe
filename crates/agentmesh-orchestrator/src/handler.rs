use agentmesh_client::ProtocolClient;
use agentmesh_core::{MeshError, MeshResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A typed handler for one logical agent.
///
/// The registry replaces string-matched dispatch: every agent name maps to
/// a handler resolved once at startup, and unknown names fail fast with
/// [`MeshError::AgentNotFound`].
#[async_trait]
pub trait AgentHandler: Send + Sync + std::fmt::Debug {
    /// Handle one query, returning the agent's result payload.
    async fn handle(
        &self,
        query: serde_json::Value,
        metadata: HashMap<String, serde_json::Value>,
    ) -> MeshResult<serde_json::Value>;
}

/// Maps agent names to their handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn AgentHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn AgentHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Resolve a handler by name.
    pub fn resolve(&self, name: &str) -> MeshResult<Arc<dyn AgentHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| MeshError::AgentNotFound(name.to_string()))
    }

    /// Registered agent names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for a networked agent, dispatching through the protocol client.
pub struct RemoteAgent {
    client: Arc<ProtocolClient>,
    agent_name: String,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for RemoteAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAgent")
            .field("agent_name", &self.agent_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteAgent {
    /// A handler calling `agent_name` with the client's default timeout.
    pub fn new(client: Arc<ProtocolClient>, agent_name: impl Into<String>) -> Self {
        Self {
            client,
            agent_name: agent_name.into(),
            timeout: None,
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl AgentHandler for RemoteAgent {
    async fn handle(
        &self,
        query: serde_json::Value,
        metadata: HashMap<String, serde_json::Value>,
    ) -> MeshResult<serde_json::Value> {
        self.client
            .send_message_by_name(&self.agent_name, query, metadata, self.timeout)
            .await
    }
}

/// Built-in handler that echoes its query back, for wiring checks.
#[derive(Debug)]
pub struct EchoAgent;

#[async_trait]
impl AgentHandler for EchoAgent {
    async fn handle(
        &self,
        query: serde_json::Value,
        _metadata: HashMap<String, serde_json::Value>,
    ) -> MeshResult<serde_json::Value> {
        Ok(query)
    }
}
