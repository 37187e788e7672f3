//! agentix-run - operator CLI for the agent back-office.
//!
//! Issues credentials, inspects routing and runs a single task end to end,
//! printing the result as JSON.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use agentix_core::auth::{OperationPolicy, TokenIssuer};
use agentix_core::kernel::{ExecutionRequest, HttpRegistryBuilder, Orchestrator, RegistryBuilder};
use agentix_core::tasks::{DocumentValidator, TaskConfig};
use agentix_core::tools::{FileRoutingLoader, RoutingConfigLoader};
use agentix_core::types::{Config, TargetId, TaskId};

#[derive(Parser)]
#[command(name = "agentix-run", version, about)]
struct Cli {
    /// YAML configuration file. Defaults to AGENTIX_* environment variables.
    #[arg(long, env = "AGENTIX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a signed credential bound to one record.
    IssueToken {
        #[arg(long)]
        target: String,
        /// Task id carried as an extra claim.
        #[arg(long)]
        task_id: Option<String>,
        /// Permission labels; derived from --capability when omitted.
        #[arg(long = "permission")]
        permissions: Vec<String>,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        #[arg(long, default_value = "1h", value_parser = humantime_serde::re::humantime::parse_duration)]
        ttl: Duration,
    },

    /// Discover every enabled server and print the operation routes.
    Routes,

    /// Run one task and print the execution result.
    Run {
        /// Full request as JSON; the other flags are ignored when given.
        #[arg(long)]
        request: Option<PathBuf>,
        #[arg(long, env = "AGENTIX_TOKEN")]
        token: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long, default_value = "cli")]
        task_id: String,
        #[arg(long, default_value = DocumentValidator::NAME)]
        task: String,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        timeout: Option<Duration>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::from_env()?,
    };
    agentix_core::observability::init_tracing_with(&config.observability);

    match cli.command {
        Commands::IssueToken {
            target,
            task_id,
            permissions,
            capabilities,
            ttl,
        } => {
            let issuer = TokenIssuer::new(config.auth.clone())?;
            let target = TargetId::from_string(target)?;
            let permissions = if permissions.is_empty() {
                OperationPolicy::default().required_permissions(&capabilities)
            } else {
                permissions
            };
            let token = match task_id {
                Some(task_id) => issuer.issue_for_task(&target, &task_id, &permissions, ttl)?,
                None => issuer.sign(&issuer.claims_for(&target, &permissions, ttl))?,
            };
            println!("{}", token);
        }

        Commands::Routes => {
            let routing = FileRoutingLoader::new(config.routing.config_path.clone()).load()?;
            let registry = HttpRegistryBuilder.build(routing, "")?;
            registry.initialize().await?;
            let report = serde_json::json!({
                "operations": registry.available_operations(),
                "discovery_failures": registry.discovery_failures(),
            });
            registry.close().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Run {
            request,
            token,
            target,
            task_id,
            task,
            capabilities,
            timeout,
        } => {
            let request = match request {
                Some(path) => serde_json::from_str::<ExecutionRequest>(&std::fs::read_to_string(path)?)?,
                None => {
                    let token = token.ok_or("--token or AGENTIX_TOKEN is required")?;
                    let target = target.ok_or("--target is required")?;
                    let capabilities = if capabilities.is_empty() && task == DocumentValidator::NAME {
                        DocumentValidator::CAPABILITIES.iter().map(|c| c.to_string()).collect()
                    } else {
                        capabilities
                    };
                    let mut task = TaskConfig::new(&task, &capabilities);
                    if let Some(timeout) = timeout {
                        task = task.with_timeout(timeout);
                    }
                    ExecutionRequest::new(
                        token,
                        TargetId::from_string(target)?,
                        TaskId::from_string(task_id)?,
                        task,
                    )
                }
            };

            let orchestrator = Orchestrator::from_config(&config)?;
            let result = orchestrator.execute(&request).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
