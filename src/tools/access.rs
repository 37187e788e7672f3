//! Task-scoped operation access and call budget.
//!
//! A task body may only invoke the operations its configuration declares,
//! and at most `max_calls` of them per run.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::types::{Error, ErrorCode, Result};

/// Task → operations access policy for one run.
///
/// If no operation is granted, the task has access to nothing.
#[derive(Debug)]
pub struct CapabilityPolicy {
    task_name: String,
    allowed: BTreeSet<String>,
    max_calls: Option<u32>,
    calls: AtomicU32,
}

impl CapabilityPolicy {
    pub fn new<S: AsRef<str>>(task_name: &str, capabilities: &[S], max_calls: Option<u32>) -> Self {
        Self {
            task_name: task_name.to_string(),
            allowed: capabilities.iter().map(|c| c.as_ref().to_string()).collect(),
            max_calls,
            calls: AtomicU32::new(0),
        }
    }

    pub fn check_access(&self, operation: &str) -> bool {
        self.allowed.contains(operation)
    }

    /// Operations the task may call, sorted.
    pub fn allowed_operations(&self) -> Vec<String> {
        self.allowed.iter().cloned().collect()
    }

    /// Calls charged so far.
    pub fn calls_made(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Admit one call to `operation`: access first, then budget.
    ///
    /// A denied call is not charged against the budget.
    pub fn admit(&self, operation: &str) -> Result<()> {
        if !self.check_access(operation) {
            return Err(Error::auth(
                ErrorCode::AuthPermissionDenied,
                format!(
                    "task '{}' is not allowed to call '{}'",
                    self.task_name, operation
                ),
                format!("allowed operations: [{}]", self.allowed_operations().join(", ")),
            ));
        }

        let Some(limit) = self.max_calls else {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        };

        let admitted = self
            .calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            });
        match admitted {
            Ok(_) => Ok(()),
            Err(n) => Err(Error::quota_exceeded(format!(
                "task '{}' exhausted its budget of {} operation calls ({} made)",
                self.task_name, limit, n
            ))),
        }
    }
}
