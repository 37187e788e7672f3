//! Routing configuration: which tool servers exist and how to reach them.
//!
//! Loaded once per run; never cached across runs.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::{Error, Result, ServerId};

/// Transport a server is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Http,
    Stdio,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Http => f.write_str("http"),
            Transport::Stdio => f.write_str("stdio"),
        }
    }
}

/// Credential scheme a server expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    #[default]
    Jwt,
    ApiKey,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAuth {
    #[serde(rename = "type", default)]
    pub scheme: AuthScheme,
    #[serde(default)]
    pub audience: String,
}

/// One tool server. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub id: ServerId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Base address, e.g. `http://localhost:8000`.
    pub url: String,
    #[serde(rename = "type", default)]
    pub transport: Transport,
    /// JSON-RPC path appended to `url`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ServerAuth>,
}

fn default_endpoint() -> String {
    "/rpc".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl ServerDescriptor {
    /// Minimal enabled HTTP descriptor.
    pub fn http(id: &str, url: impl Into<String>) -> Result<Self> {
        let id = ServerId::from_string(id.to_string()).map_err(Error::config)?;
        Ok(Self {
            name: id.to_string(),
            id,
            description: String::new(),
            url: url.into(),
            transport: Transport::Http,
            endpoint: default_endpoint(),
            timeout: default_timeout_secs(),
            enabled: true,
            auth: None,
        })
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Full JSON-RPC address.
    pub fn rpc_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        if self.endpoint.is_empty() {
            base.to_string()
        } else if self.endpoint.starts_with('/') {
            format!("{}{}", base, self.endpoint)
        } else {
            format!("{}/{}", base, self.endpoint)
        }
    }
}

/// The full routing table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(rename = "mcp_servers", default)]
    pub servers: Vec<ServerDescriptor>,
}

impl RoutingConfig {
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        Self { servers }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: RoutingConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Enabled descriptors in configuration order.
    pub fn enabled(&self) -> Vec<&ServerDescriptor> {
        self.servers.iter().filter(|s| s.enabled).collect()
    }

    pub fn get(&self, id: &ServerId) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|s| &s.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.id.as_str().trim().is_empty() {
                return Err(Error::config("server id cannot be empty"));
            }
            if !seen.insert(server.id.clone()) {
                return Err(Error::config(format!("duplicate server id: {}", server.id)));
            }
            if server.url.trim().is_empty() {
                return Err(Error::config(format!("server '{}' has no url", server.id)));
            }
            if server.timeout == 0 {
                return Err(Error::config(format!(
                    "server '{}' timeout must be positive",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Loaders
// =============================================================================

/// Source of the routing table, consulted at the start of every run.
pub trait RoutingConfigLoader: Send + Sync + fmt::Debug {
    fn load(&self) -> Result<RoutingConfig>;
}

/// Reads a YAML routing file on every call.
#[derive(Debug, Clone)]
pub struct FileRoutingLoader {
    path: PathBuf,
}

impl FileRoutingLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RoutingConfigLoader for FileRoutingLoader {
    fn load(&self) -> Result<RoutingConfig> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::config(format!(
                "failed to read routing config {}: {}",
                self.path.display(),
                e
            ))
        })?;
        RoutingConfig::from_yaml_str(&raw)
    }
}

/// Fixed in-memory routing table.
#[derive(Debug, Clone)]
pub struct StaticRoutingLoader {
    config: RoutingConfig,
}

impl StaticRoutingLoader {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }
}

impl RoutingConfigLoader for StaticRoutingLoader {
    fn load(&self) -> Result<RoutingConfig> {
        self.config.validate()?;
        Ok(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
mcp_servers:
  - id: expedientes
    name: MCP Expedientes
    description: Case files
    url: http://localhost:8000/
    type: http
    timeout: 10
    auth:
      type: jwt
      audience: agentix-mcp-expedientes
  - id: normativa
    name: MCP Normativa
    description: Regulations
    url: http://localhost:8001
    enabled: false
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = RoutingConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.servers.len(), 2);

        let first = &config.servers[0];
        assert_eq!(first.endpoint, "/rpc");
        assert_eq!(first.timeout, 10);
        assert_eq!(first.rpc_url(), "http://localhost:8000/rpc");
        assert_eq!(first.auth.as_ref().unwrap().scheme, AuthScheme::Jwt);

        let second = &config.servers[1];
        assert_eq!(second.transport, Transport::Http);
        assert_eq!(second.timeout, 30);
        assert!(!second.enabled);
    }

    #[test]
    fn test_enabled_filter_keeps_order() {
        let config = RoutingConfig::from_yaml_str(YAML).unwrap();
        let enabled: Vec<&str> = config.enabled().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(enabled, vec!["expedientes"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = RoutingConfig::new(vec![
            ServerDescriptor::http("a", "http://x").unwrap(),
            ServerDescriptor::http("a", "http://y").unwrap(),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_loader_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.yaml");
        std::fs::write(&path, YAML).unwrap();
        let loader = FileRoutingLoader::new(&path);
        assert_eq!(loader.load().unwrap().servers.len(), 2);

        std::fs::write(&path, "mcp_servers: []\n").unwrap();
        assert!(loader.load().unwrap().servers.is_empty());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let loader = FileRoutingLoader::new("/nonexistent/routing.yaml");
        let err = loader.load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rpc_url_joins() {
        let mut d = ServerDescriptor::http("a", "http://h:1").unwrap();
        d.endpoint = "jsonrpc".into();
        assert_eq!(d.rpc_url(), "http://h:1/jsonrpc");
    }
}
