//! Multi-server tool registry.
//!
//! Builds one [`ServerClient`] per enabled server, discovers their operations
//! concurrently and routes each call to the server that advertised it. A
//! server that fails discovery is logged and skipped; the others stay usable.
//! Routes are rebuilt for every run and never shared across runs.

use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::client::ServerClient;
use super::routing::{RoutingConfig, ServerDescriptor};
use super::schema::ToolSchema;
use crate::types::{Error, ErrorCode, Result, ServerId};

/// Discovery outcome, fixed once `initialize` completes.
#[derive(Debug, Default)]
struct Routes {
    clients: HashMap<ServerId, Arc<ServerClient>>,
    /// operation → server
    index: BTreeMap<String, ServerId>,
    schemas: HashMap<String, ToolSchema>,
    /// server → discovery error
    failures: BTreeMap<ServerId, String>,
}

/// Operation router over a set of tool servers.
pub struct ToolRegistry {
    config: RoutingConfig,
    token: String,
    routes: OnceCell<Routes>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("servers", &self.enabled_server_ids())
            .field("initialized", &self.is_initialized())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    pub fn new(config: RoutingConfig, token: impl Into<String>) -> Self {
        Self {
            config,
            token: token.into(),
            routes: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create clients and discover operations. Idempotent.
    ///
    /// Fails only when a client cannot be constructed (configuration
    /// error); discovery failures are tolerated.
    pub async fn initialize(&self) -> Result<()> {
        self.routes.get_or_try_init(|| self.discover()).await?;
        Ok(())
    }

    async fn discover(&self) -> Result<Routes> {
        let enabled = self.config.enabled();
        let mut clients = Vec::with_capacity(enabled.len());
        for descriptor in enabled {
            clients.push(Arc::new(ServerClient::new(
                descriptor.clone(),
                self.token.clone(),
            )?));
        }

        // join_all keeps configuration order, which decides route conflicts.
        let results = join_all(clients.iter().map(|c| c.list_operations())).await;

        let mut routes = Routes::default();
        for (client, result) in clients.iter().zip(results) {
            let server_id = client.server_id().clone();
            match result {
                Ok(operations) => {
                    tracing::debug!(
                        server_id = %server_id,
                        operations = operations.len(),
                        "server_discovered"
                    );
                    for op in operations {
                        if let Some(owner) = routes.index.get(&op.name) {
                            tracing::warn!(
                                operation = %op.name,
                                kept = %owner,
                                ignored = %server_id,
                                "duplicate_operation_ignored"
                            );
                            continue;
                        }
                        let schema = ToolSchema::from_discovery(
                            &op.name,
                            &op.description,
                            op.input_schema.as_ref(),
                        );
                        routes.schemas.insert(op.name.clone(), schema);
                        routes.index.insert(op.name, server_id.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(server_id = %server_id, error = %e, "discovery_failed");
                    routes.failures.insert(server_id.clone(), e.to_string());
                }
            }
            routes.clients.insert(server_id, Arc::clone(client));
        }

        tracing::info!(
            servers = routes.clients.len(),
            operations = routes.index.len(),
            failed = routes.failures.len(),
            "registry_initialized"
        );
        Ok(routes)
    }

    /// Route one call, initializing first if needed.
    pub async fn call(&self, operation: &str, arguments: Value) -> Result<Value> {
        self.ensure_open()?;
        self.initialize().await?;
        let client = self.resolve(operation, &arguments)?;
        client.call(operation, arguments).await
    }

    /// Blocking [`ToolRegistry::call`]. Requires a prior `initialize` and
    /// must not be called from an async context.
    pub fn call_blocking(&self, operation: &str, arguments: Value) -> Result<Value> {
        self.ensure_open()?;
        if !self.is_initialized() {
            return Err(Error::internal(
                "registry must be initialized before blocking calls",
            ));
        }
        let client = self.resolve(operation, &arguments)?;
        client.call_blocking(operation, arguments)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::connection(
                ErrorCode::ConnectionError,
                "tool registry is closed",
                "no further calls are accepted after close",
            ));
        }
        Ok(())
    }

    /// Look up the owning client and check the argument bag.
    fn resolve(&self, operation: &str, arguments: &Value) -> Result<Arc<ServerClient>> {
        let routes = self
            .routes
            .get()
            .ok_or_else(|| Error::internal("registry not initialized"))?;

        let Some(server_id) = routes.index.get(operation) else {
            let known: Vec<&str> = routes.index.keys().map(String::as_str).collect();
            return Err(Error::tool(
                ErrorCode::ToolNotFound,
                format!("operation '{}' not found on any configured server", operation),
                format!("available operations: [{}]", known.join(", ")),
            ));
        };

        if let Some(schema) = routes.schemas.get(operation) {
            schema.validate(arguments)?;
        }

        routes.clients.get(server_id).cloned().ok_or_else(|| {
            Error::internal(format!("route to unknown server '{}'", server_id))
        })
    }

    /// Release every client. Idempotent, never fails.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(routes) = self.routes.get() {
            join_all(routes.clients.values().map(|c| c.close())).await;
        }
        tracing::debug!("registry_closed");
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn is_initialized(&self) -> bool {
        self.routes.initialized()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of operation → server.
    pub fn available_operations(&self) -> BTreeMap<String, ServerId> {
        self.routes
            .get()
            .map(|r| r.index.clone())
            .unwrap_or_default()
    }

    /// Known operation names, sorted.
    pub fn operation_names(&self) -> Vec<String> {
        self.routes
            .get()
            .map(|r| r.index.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_available(&self, operation: &str) -> bool {
        self.server_for(operation).is_some()
    }

    pub fn server_for(&self, operation: &str) -> Option<ServerId> {
        self.routes.get()?.index.get(operation).cloned()
    }

    pub fn schema(&self, operation: &str) -> Option<ToolSchema> {
        self.routes.get()?.schemas.get(operation).cloned()
    }

    /// Enabled servers in configuration order.
    pub fn enabled_server_ids(&self) -> Vec<ServerId> {
        self.config.enabled().into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn descriptor(&self, server_id: &ServerId) -> Option<&ServerDescriptor> {
        self.config.get(server_id)
    }

    /// Servers whose discovery failed, with the error text.
    pub fn discovery_failures(&self) -> BTreeMap<ServerId, String> {
        self.routes
            .get()
            .map(|r| r.failures.clone())
            .unwrap_or_default()
    }
}
