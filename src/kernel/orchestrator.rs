//! Execution orchestrator - the composition root of one run.
//!
//! Validates the credential, loads routing, builds and initializes a fresh
//! [`ToolRegistry`], runs the task body and folds everything into an
//! [`ExecutionResult`]. The registry is closed on every exit path, including
//! timeouts and panicking task bodies.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use super::lifecycle::{RunLifecycle, RunState};
use crate::audit::{AuditLog, AuditStore};
use crate::auth::{ClaimsValidator, OperationPolicy};
use crate::tasks::{Payload, RunScope, TaskCatalog, TaskConfig, TaskContext};
use crate::tools::{FileRoutingLoader, RoutingConfig, RoutingConfigLoader, ToolRegistry};
use crate::types::{AgentError, Config, Error, Result, RunId, TargetId, TaskId};

// =============================================================================
// Request / result
// =============================================================================

/// One execution request.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Bearer credential. Forwarded to tool servers, never logged.
    #[serde(rename = "token")]
    pub credential: String,

    #[serde(rename = "expediente_id")]
    pub target_id: TargetId,

    #[serde(rename = "tarea_id")]
    pub task_id: TaskId,

    #[serde(rename = "agent_config")]
    pub task: TaskConfig,

    /// Where to deliver the completion notice, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("credential", &"<redacted>")
            .field("target_id", &self.target_id)
            .field("task_id", &self.task_id)
            .field("task", &self.task)
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

impl ExecutionRequest {
    pub fn new(
        credential: impl Into<String>,
        target_id: TargetId,
        task_id: TaskId,
        task: TaskConfig,
    ) -> Self {
        Self {
            credential: credential.into(),
            target_id,
            task_id,
            task,
            callback_url: None,
        }
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// Outcome of one run. Exactly one of `payload`/`error` is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    #[serde(rename = "agent_run_id")]
    pub run_id: RunId,

    #[serde(rename = "resultado")]
    pub payload: Payload,

    /// Redacted audit messages, in order.
    #[serde(rename = "log_auditoria")]
    pub audit_log: Vec<String>,

    /// Distinct operations invoked, in first-use order.
    #[serde(rename = "herramientas_usadas")]
    pub operations_used: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
}

impl ExecutionResult {
    pub fn error_code(&self) -> Option<crate::types::ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

// =============================================================================
// Registry construction
// =============================================================================

/// Builds the per-run tool registry. Construction is synchronous so the
/// registry is owned by the run before any discovery I/O starts.
pub trait RegistryBuilder: Send + Sync + fmt::Debug {
    fn build(&self, config: RoutingConfig, token: &str) -> Result<ToolRegistry>;
}

/// Default builder: JSON-RPC over HTTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRegistryBuilder;

impl RegistryBuilder for HttpRegistryBuilder {
    fn build(&self, config: RoutingConfig, token: &str) -> Result<ToolRegistry> {
        config.validate()?;
        Ok(ToolRegistry::new(config, token))
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Mutable per-run state that must outlive a cancelled task future.
struct RunFrame {
    audit: AuditLog,
    lifecycle: RunLifecycle,
    registry: Option<ToolRegistry>,
    operations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    validator: ClaimsValidator,
    routing: Arc<dyn RoutingConfigLoader>,
    builder: Arc<dyn RegistryBuilder>,
    audit_store: AuditStore,
    catalog: TaskCatalog,
    policy: OperationPolicy,
    default_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        validator: ClaimsValidator,
        routing: Arc<dyn RoutingConfigLoader>,
        builder: Arc<dyn RegistryBuilder>,
        audit_store: AuditStore,
        catalog: TaskCatalog,
    ) -> Self {
        Self {
            validator,
            routing,
            builder,
            audit_store,
            catalog,
            policy: OperationPolicy::default(),
            default_timeout: Duration::from_secs(300),
        }
    }

    /// Wire the default collaborators from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let validator = ClaimsValidator::new(config.auth.clone())?;
        Ok(Self::new(
            validator,
            Arc::new(FileRoutingLoader::new(config.routing.config_path.clone())),
            Arc::new(HttpRegistryBuilder),
            AuditStore::new(config.audit.log_dir.clone()),
            TaskCatalog::with_builtins(),
        )
        .with_default_timeout(config.execution.default_timeout))
    }

    pub fn with_policy(mut self, policy: OperationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Budget for requests that do not carry one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn audit_store(&self) -> &AuditStore {
        &self.audit_store
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    /// Run `request` under a freshly generated run id.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute_as(RunId::generate(), request).await
    }

    /// Run `request` under `run_id`. Never fails: every failure is folded
    /// into the result.
    pub async fn execute_as(&self, run_id: RunId, request: &ExecutionRequest) -> ExecutionResult {
        let scope = RunScope {
            run_id,
            target_id: request.target_id.clone(),
            task_id: request.task_id.clone(),
        };
        let mut frame = RunFrame {
            audit: self.audit_store.open(&scope.target_id, &scope.run_id),
            lifecycle: RunLifecycle::new(),
            registry: None,
            operations: Vec::new(),
        };
        frame.audit.log(format!(
            "starting run of task {} for task id {}",
            request.task.name, scope.task_id
        ));

        let outcome = match self.authorize(request, &mut frame) {
            Ok(()) => self.run_guarded(&scope, request, &mut frame).await,
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(payload) => {
                frame.lifecycle.advance(RunState::Succeeded, &mut frame.audit);
                frame.audit.log("task completed successfully");
                Ok(payload)
            }
            Err(e) => {
                let agent = e.to_agent_error();
                frame.audit.error(
                    format!("run failed: [{}] {}", agent.code, agent.message),
                    agent.detail.as_ref().map(|d| json!({"detalle": d})),
                );
                frame.lifecycle.advance(RunState::Failed, &mut frame.audit);
                Err(agent)
            }
        };

        if let Some(registry) = frame.registry.take() {
            registry.close().await;
            frame.audit.log("tool registry closed");
        }
        frame.lifecycle.advance(RunState::Closed, &mut frame.audit);

        let audit_log = frame.audit.entries();
        match result {
            Ok(payload) => ExecutionResult {
                success: true,
                run_id: scope.run_id,
                payload,
                audit_log,
                operations_used: frame.operations,
                error: None,
            },
            Err(error) => ExecutionResult {
                success: false,
                run_id: scope.run_id,
                payload: Payload::new(),
                audit_log,
                operations_used: frame.operations,
                error: Some(error),
            },
        }
    }

    fn authorize(&self, request: &ExecutionRequest, frame: &mut RunFrame) -> Result<()> {
        frame
            .lifecycle
            .advance(RunState::Authorizing, &mut frame.audit);
        let required = self.policy.required_permissions(&request.task.capabilities);
        let context =
            self.validator
                .validate(&request.credential, &request.target_id, &required)?;
        frame.audit.log(format!(
            "credential valid for record {}, permissions: [{}]",
            context.target_id,
            context
                .permissions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        ));
        Ok(())
    }

    /// Routing and task phases under the wall-clock budget, with panics in
    /// the task body turned into errors.
    async fn run_guarded(
        &self,
        scope: &RunScope,
        request: &ExecutionRequest,
        frame: &mut RunFrame,
    ) -> Result<Payload> {
        let budget = request.task.budget.timeout.unwrap_or(self.default_timeout);
        let work = AssertUnwindSafe(self.route_and_run(scope, request, frame)).catch_unwind();

        match tokio::time::timeout(budget, work).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(run_id = %scope.run_id, panic = %msg, "task_panic_recovered");
                Err(Error::internal(format!("task body panicked: {}", msg)))
            }
            Err(_) => Err(Error::timeout(format!(
                "execution exceeded its time budget of {}",
                humantime_serde::re::humantime::format_duration(budget)
            ))),
        }
    }

    async fn route_and_run(
        &self,
        scope: &RunScope,
        request: &ExecutionRequest,
        frame: &mut RunFrame,
    ) -> Result<Payload> {
        frame
            .lifecycle
            .advance(RunState::ConfiguringRoutes, &mut frame.audit);

        let routing = self.routing.load()?;
        frame.audit.log(format!(
            "routing loaded: {} enabled servers",
            routing.enabled().len()
        ));

        let registry: &ToolRegistry = frame
            .registry
            .insert(self.builder.build(routing, &request.credential)?);
        registry.initialize().await?;
        for (server, error) in registry.discovery_failures() {
            frame
                .audit
                .warning(format!("server {} unavailable: {}", server, error), None);
        }
        frame.audit.log(format!(
            "operations available: [{}]",
            registry.operation_names().join(", ")
        ));

        let body = self.catalog.resolve(&request.task.name)?;
        frame
            .lifecycle
            .advance(RunState::RunningTask, &mut frame.audit);

        let mut ctx = TaskContext::new(
            scope,
            &request.task,
            registry,
            &mut frame.audit,
            &mut frame.operations,
        );
        body.execute(&mut ctx).await
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
