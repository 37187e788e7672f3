//! Pluggable task bodies.
//!
//! A task body is the unit of work an orchestration runs once authorization
//! and routing are in place. Bodies are registered by name in a
//! [`TaskCatalog`] and resolved once per run; they only reach tool servers
//! through the [`TaskContext`], which enforces the task's declared
//! capabilities and call budget and records every operation used.

mod document_validator;

pub use document_validator::DocumentValidator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditLog;
use crate::tools::{CapabilityPolicy, ToolRegistry};
use crate::types::{Error, Result, RunId, TargetId, TaskId};

/// Opaque result payload of a task body.
pub type Payload = Map<String, Value>;

// =============================================================================
// Configuration
// =============================================================================

/// Per-run resource limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBudget {
    /// Wall-clock budget for routing and the task body.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Maximum number of operation calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
}

/// Caller-supplied task configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Catalog name of the task body.
    pub name: String,

    /// Operations the body may call. Also drives the permission labels the
    /// credential must carry.
    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub budget: ResourceBudget,

    /// Free-form parameters passed through to the body.
    #[serde(default)]
    pub parameters: Payload,
}

impl TaskConfig {
    pub fn new<S: AsRef<str>>(name: &str, capabilities: &[S]) -> Self {
        Self {
            name: name.to_string(),
            capabilities: capabilities.iter().map(|c| c.as_ref().to_string()).collect(),
            budget: ResourceBudget::default(),
            parameters: Payload::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.budget.timeout = Some(timeout);
        self
    }

    pub fn with_max_tool_calls(mut self, max: u32) -> Self {
        self.budget.max_tool_calls = Some(max);
        self
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }
}

// =============================================================================
// Context
// =============================================================================

/// Identity of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunScope {
    pub run_id: RunId,
    pub target_id: TargetId,
    pub task_id: TaskId,
}

/// Everything a task body may touch during one run.
///
/// The audit log and the used-operations list are borrowed from the caller
/// so that both survive a body that is cancelled mid-flight.
pub struct TaskContext<'a> {
    scope: &'a RunScope,
    config: &'a TaskConfig,
    registry: &'a ToolRegistry,
    audit: &'a mut AuditLog,
    policy: CapabilityPolicy,
    operations_used: &'a mut Vec<String>,
}

impl fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("scope", self.scope)
            .field("task", &self.config.name)
            .field("operations_used", &self.operations_used)
            .finish_non_exhaustive()
    }
}

impl<'a> TaskContext<'a> {
    pub fn new(
        scope: &'a RunScope,
        config: &'a TaskConfig,
        registry: &'a ToolRegistry,
        audit: &'a mut AuditLog,
        operations_used: &'a mut Vec<String>,
    ) -> Self {
        let policy = CapabilityPolicy::new(
            &config.name,
            &config.capabilities,
            config.budget.max_tool_calls,
        );
        Self {
            scope,
            config,
            registry,
            audit,
            policy,
            operations_used,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.scope.run_id
    }

    pub fn target_id(&self) -> &TargetId {
        &self.scope.target_id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.scope.task_id
    }

    pub fn config(&self) -> &TaskConfig {
        self.config
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.config.parameters.get(key)
    }

    /// Append an INFO entry to the run's audit trail.
    pub fn log(&mut self, message: impl AsRef<str>) {
        self.audit.log(message);
    }

    pub fn warning(&mut self, message: impl AsRef<str>) {
        self.audit.warning(message, None);
    }

    /// Invoke an operation through the registry.
    ///
    /// Undeclared operations are refused before routing; admitted ones are
    /// recorded even if the call then fails.
    pub async fn call(&mut self, operation: &str, arguments: Value) -> Result<Value> {
        self.policy.admit(operation)?;
        if !self.operations_used.iter().any(|op| op == operation) {
            self.operations_used.push(operation.to_string());
        }
        self.registry.call(operation, arguments).await
    }

    pub fn is_available(&self, operation: &str) -> bool {
        self.registry.is_available(operation)
    }

    /// Distinct operations invoked, in first-use order.
    pub fn operations_used(&self) -> &[String] {
        self.operations_used
    }

    pub fn calls_made(&self) -> u32 {
        self.policy.calls_made()
    }
}

// =============================================================================
// Task bodies
// =============================================================================

/// One pluggable unit of work.
#[async_trait]
pub trait TaskBody: Send + Sync + fmt::Debug {
    async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<Payload>;
}

/// Task name → body.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    bodies: BTreeMap<String, Arc<dyn TaskBody>>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in body registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(DocumentValidator::NAME, Arc::new(DocumentValidator::default()));
        catalog
    }

    /// Register (or replace) a body under `name`.
    pub fn register(&mut self, name: &str, body: Arc<dyn TaskBody>) {
        self.bodies.insert(name.to_string(), body);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.bodies.keys().cloned().collect()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn TaskBody>> {
        self.bodies.get(name).cloned().ok_or_else(|| {
            Error::agent_not_configured(format!(
                "task '{}' not found, available tasks: [{}]",
                name,
                self.names().join(", ")
            ))
        })
    }
}
