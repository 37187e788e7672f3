//! Core types for the agent back-office.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (RunId, TargetId, TaskId, ServerId)
//! - **Errors**: The closed error taxonomy and the crate error enum
//! - **Config**: Configuration structures for auth, routing, audit, delivery

mod config;
mod errors;
mod ids;

pub use config::{
    AuditConfig, AuthConfig, Config, DeliveryConfig, ExecutionConfig, ObservabilityConfig,
    RoutingSettings,
};
pub use errors::{AgentError, Error, ErrorCode, Result};
pub use ids::{RunId, ServerId, TargetId, TaskId};
