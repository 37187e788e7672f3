//! Run state machine.
//!
//! ```text
//! Created → Authorizing → ConfiguringRoutes → RunningTask → Succeeded ─┐
//!               │                │                 │                   ├→ Closed
//!               └────────────────┴─────────────────┴──→ Failed ────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audit::AuditLog;
use crate::types::{Error, Result};

/// State of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Authorizing,
    ConfiguringRoutes,
    RunningTask,
    Succeeded,
    Failed,
    Closed,
}

impl RunState {
    /// Succeeded or Failed. Closed is reached from either.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    pub fn can_transition_to(self, to: RunState) -> bool {
        match (self, to) {
            (RunState::Created, RunState::Authorizing) => true,
            // AUTHORIZING
            (RunState::Authorizing, RunState::ConfiguringRoutes) => true,
            (RunState::Authorizing, RunState::Failed) => true,
            // CONFIGURING_ROUTES
            (RunState::ConfiguringRoutes, RunState::RunningTask) => true,
            (RunState::ConfiguringRoutes, RunState::Failed) => true,
            // RUNNING_TASK
            (RunState::RunningTask, RunState::Succeeded) => true,
            (RunState::RunningTask, RunState::Failed) => true,
            // Terminal states only close
            (RunState::Succeeded, RunState::Closed) => true,
            (RunState::Failed, RunState::Closed) => true,
            // CLOSED is final
            (RunState::Closed, _) => false,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Authorizing => "authorizing",
            RunState::ConfiguringRoutes => "configuring_routes",
            RunState::RunningTask => "running_task",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Closed => "closed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the timestamped path taken to reach it.
#[derive(Debug, Clone)]
pub struct RunLifecycle {
    state: RunState,
    history: Vec<(RunState, DateTime<Utc>)>,
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self {
            state: RunState::Created,
            history: vec![(RunState::Created, Utc::now())],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn history(&self) -> &[(RunState, DateTime<Utc>)] {
        &self.history
    }

    /// Move to `to`, rejecting transitions the machine does not allow.
    pub fn transition(&mut self, to: RunState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::internal(format!(
                "invalid run state transition {} -> {}",
                self.state, to
            )));
        }
        self.state = to;
        self.history.push((to, Utc::now()));
        Ok(())
    }

    /// [`RunLifecycle::transition`] plus an audit entry for the move.
    ///
    /// An invalid transition is recorded as an audit warning and leaves the
    /// state unchanged.
    pub fn advance(&mut self, to: RunState, audit: &mut AuditLog) {
        let from = self.state;
        match self.transition(to) {
            Ok(()) => audit.log(format!("state {} -> {}", from, to)),
            Err(e) => audit.warning(e.to_string(), None),
        }
    }
}
