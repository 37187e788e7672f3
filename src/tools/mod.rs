//! Tool routing: server configuration, JSON-RPC clients, discovery-driven
//! registry, argument schemas and task-scoped access control.

pub mod access;
pub mod client;
pub mod registry;
pub mod routing;
pub mod schema;

pub use access::CapabilityPolicy;
pub use client::{OperationInfo, ServerClient};
pub use registry::ToolRegistry;
pub use routing::{
    AuthScheme, FileRoutingLoader, RoutingConfig, RoutingConfigLoader, ServerAuth,
    ServerDescriptor, StaticRoutingLoader, Transport,
};
pub use schema::ToolSchema;
