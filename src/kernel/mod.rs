//! Kernel - run orchestration and the services around it.
//!
//! The [`Orchestrator`] drives one run through the [`RunState`] machine.
//! [`ExecutionService`] wraps it for fire-and-forget submission, backed by
//! the [`TaskTracker`], the [`TrackerSweeper`] and a [`CompletionSink`].

pub mod cleanup;
pub mod delivery;
pub mod lifecycle;
pub mod orchestrator;
pub mod services;
pub mod tracker;

pub use cleanup::{SweepConfig, TrackerSweeper};
pub use delivery::{check_callback_url, CompletionNotice, CompletionSink, DeliveryReport, WebhookSink};
pub use lifecycle::{RunLifecycle, RunState};
pub use orchestrator::{
    ExecutionRequest, ExecutionResult, HttpRegistryBuilder, Orchestrator, RegistryBuilder,
};
pub use services::ExecutionService;
pub use tracker::{TaskStatus, TaskTracker, TrackedTask};
