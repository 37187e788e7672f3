//! # Agentix Core - Agent Execution Back-Office
//!
//! Runs pluggable task bodies against a set of JSON-RPC tool servers on
//! behalf of a workflow engine:
//! - Bearer credential validation scoped to one target record
//! - Multi-server operation routing with concurrent discovery
//! - Audited run orchestration with PII redaction
//! - Fire-and-forget submission with status tracking and webhook delivery
//!
//! ## Architecture
//!
//! ```text
//!   ExecutionRequest
//!         │
//!         ▼
//!   ┌──────────────────────────── Orchestrator ───────────────────────────┐
//!   │  ClaimsValidator → RoutingConfigLoader → ToolRegistry → TaskBody    │
//!   │         │                                    │  ▲          │        │
//!   │         └──────────────► AuditLog ◄──────────┘  └─ TaskContext      │
//!   └─────────────────────────────────────────────────────────────────────┘
//!         │
//!         ▼
//!   ExecutionResult ──► TaskTracker ──► CompletionSink
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod audit;
pub mod auth;
pub mod kernel;
pub mod tasks;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use kernel::{ExecutionRequest, ExecutionResult, ExecutionService, Orchestrator};
pub use types::{AgentError, Config, Error, ErrorCode, Result};
