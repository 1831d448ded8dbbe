use agentmesh_core::{MeshError, MeshResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A network endpoint for an agent service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// URL scheme; defaults to `http`.
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_scheme() -> String {
    "http".to_string()
}

impl Endpoint {
    /// An `http` endpoint at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: default_scheme(),
        }
    }

    /// The base URL for this endpoint, e.g. `http://127.0.0.1:8041`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// The `host:port` authority used as the pool's per-host key.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse `host:port` (scheme defaults to http).
    pub fn parse(s: &str) -> MeshResult<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| MeshError::Config(format!("invalid endpoint '{s}': expected host:port")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| MeshError::Config(format!("invalid port in endpoint '{s}'")))?;
        if host.is_empty() {
            return Err(MeshError::Config(format!("invalid endpoint '{s}': empty host")));
        }
        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base_url())
    }
}

/// Maps logical agent names to network endpoints.
///
/// Built from a base static table plus caller-supplied overrides merged at
/// construction time; overrides win on name collision. Entries can also be
/// registered (or overwritten) at runtime.
pub struct PortRegistry {
    entries: RwLock<HashMap<String, Endpoint>>,
}

impl PortRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Build from a base table with overrides merged on top.
    pub fn with_overrides(
        base: HashMap<String, Endpoint>,
        overrides: HashMap<String, Endpoint>,
    ) -> Self {
        let mut entries = base;
        entries.extend(overrides);
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Store or overwrite a name → endpoint mapping.
    pub fn register(&self, name: impl Into<String>, endpoint: Endpoint) {
        let name = name.into();
        tracing::debug!(agent = %name, endpoint = %endpoint, "registered agent endpoint");
        self.entries.write().insert(name, endpoint);
    }

    /// Resolve a logical name to its endpoint.
    pub fn resolve(&self, name: &str) -> MeshResult<Endpoint> {
        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MeshError::AgentNotFound(name.to_string()))
    }

    /// All registered `(name, endpoint)` pairs.
    pub fn endpoints(&self) -> Vec<(String, Endpoint)> {
        self.entries
            .read()
            .iter()
            .map(|(name, ep)| (name.clone(), ep.clone()))
            .collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}
