//! In-memory status of submitted runs.
//!
//! Written by the execution path and read by pollers, so the map sits behind
//! one mutex and readers always get a copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::orchestrator::ExecutionResult;
use crate::tasks::Payload;
use crate::types::{AgentError, ErrorCode, RunId, TargetId, TaskId};

/// Coarse status of a tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTask {
    #[serde(rename = "agent_run_id")]
    pub run_id: RunId,
    #[serde(rename = "expediente_id")]
    pub target_id: TargetId,
    #[serde(rename = "tarea_id")]
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: i64,
    pub success: Option<bool>,
    #[serde(rename = "resultado")]
    pub payload: Option<Payload>,
    pub error: Option<AgentError>,
}

impl TrackedTask {
    fn finish(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        self.elapsed_seconds = (now - self.started_at).num_seconds();
    }
}

/// Thread-safe run tracker.
#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: Mutex<HashMap<RunId, TrackedTask>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-written entry, so
    // a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, TrackedTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a new run as `pending`. Re-registering resets the entry.
    pub fn register(&self, run_id: RunId, target_id: TargetId, task_id: TaskId) {
        self.register_at(run_id, target_id, task_id, Utc::now());
    }

    pub(crate) fn register_at(
        &self,
        run_id: RunId,
        target_id: TargetId,
        task_id: TaskId,
        started_at: DateTime<Utc>,
    ) {
        let task = TrackedTask {
            run_id: run_id.clone(),
            target_id,
            task_id,
            status: TaskStatus::Pending,
            started_at,
            completed_at: None,
            elapsed_seconds: 0,
            success: None,
            payload: None,
            error: None,
        };
        self.lock().insert(run_id, task);
    }

    /// Unknown ids are ignored by every `mark_*` call.
    pub fn mark_running(&self, run_id: &RunId) {
        if let Some(task) = self.lock().get_mut(run_id) {
            task.status = TaskStatus::Running;
        }
    }

    /// Record a finished orchestration, successful or not.
    pub fn mark_completed(&self, run_id: &RunId, result: &ExecutionResult) {
        if let Some(task) = self.lock().get_mut(run_id) {
            task.finish(TaskStatus::Completed, Utc::now());
            task.success = Some(result.success);
            task.payload = Some(result.payload.clone());
            task.error = if result.success {
                None
            } else {
                Some(result.error.clone().unwrap_or_else(|| {
                    AgentError::new(ErrorCode::InternalError, "unknown error", None)
                }))
            };
        }
    }

    /// Record a run that timed out or never produced a result.
    pub fn mark_failed(&self, run_id: &RunId, error: AgentError) {
        if let Some(task) = self.lock().get_mut(run_id) {
            task.finish(TaskStatus::Failed, Utc::now());
            task.success = Some(false);
            task.error = Some(error);
        }
    }

    /// Copy of the entry. A running entry has its elapsed time refreshed.
    pub fn get_status(&self, run_id: &RunId) -> Option<TrackedTask> {
        let mut tasks = self.lock();
        let task = tasks.get_mut(run_id)?;
        if task.status == TaskStatus::Running {
            task.elapsed_seconds = (Utc::now() - task.started_at).num_seconds();
        }
        Some(task.clone())
    }

    /// Drop entries started more than `max_age` ago. Returns how many.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|_, task| task.started_at >= cutoff);
        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = tasks.len(), "tracker_cleanup");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(n: u32) -> (RunId, TargetId, TaskId) {
        (
            RunId::from_string(format!("RUN-{}", n)).unwrap(),
            TargetId::from_string("EXP-1".into()).unwrap(),
            TaskId::from_string("T-1".into()).unwrap(),
        )
    }

    fn result(run_id: &RunId, success: bool) -> ExecutionResult {
        let mut payload = Payload::new();
        payload.insert("completado".into(), json!(success));
        ExecutionResult {
            success,
            run_id: run_id.clone(),
            payload,
            audit_log: vec![],
            operations_used: vec!["consultar_expediente".into()],
            error: (!success).then(|| AgentError::new(ErrorCode::ToolError, "bad", None)),
        }
    }

    #[test]
    fn test_register_then_status_is_pending() {
        let tracker = TaskTracker::new();
        let (run, target, task) = ids(1);
        tracker.register(run.clone(), target, task);

        let status = tracker.get_status(&run).unwrap();
        assert_eq!(status.status, TaskStatus::Pending);
        assert!(status.completed_at.is_none());

        tracker.mark_running(&run);
        assert_eq!(tracker.get_status(&run).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn test_elapsed_frozen_after_completion() {
        let tracker = TaskTracker::new();
        let (run, target, task) = ids(2);
        let started = Utc::now() - chrono::Duration::seconds(42);
        tracker.register_at(run.clone(), target, task, started);
        tracker.mark_running(&run);
        assert!(tracker.get_status(&run).unwrap().elapsed_seconds >= 42);

        tracker.mark_completed(&run, &result(&run, true));

        let first = tracker.get_status(&run).unwrap();
        assert_eq!(first.status, TaskStatus::Completed);
        let completed_at = first.completed_at.unwrap();
        assert_eq!(
            first.elapsed_seconds,
            (completed_at - first.started_at).num_seconds()
        );
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(tracker.get_status(&run).unwrap(), first);
    }

    #[test]
    fn test_completed_with_failed_result_keeps_error() {
        let tracker = TaskTracker::new();
        let (run, target, task) = ids(3);
        tracker.register(run.clone(), target, task);
        tracker.mark_completed(&run, &result(&run, false));

        let status = tracker.get_status(&run).unwrap();
        assert_eq!(status.status, TaskStatus::Completed);
        assert_eq!(status.success, Some(false));
        assert_eq!(status.error.unwrap().code, ErrorCode::ToolError);
    }

    #[test]
    fn test_mark_failed() {
        let tracker = TaskTracker::new();
        let (run, target, task) = ids(4);
        tracker.register(run.clone(), target, task);
        tracker.mark_failed(&run, AgentError::new(ErrorCode::Timeout, "slow", None));

        let status = tracker.get_status(&run).unwrap();
        assert_eq!(status.status, TaskStatus::Failed);
        assert_eq!(status.success, Some(false));
        assert!(status.payload.is_none());
    }

    #[test]
    fn test_unknown_run_is_absent() {
        let tracker = TaskTracker::new();
        let (run, _, _) = ids(5);
        tracker.mark_running(&run);
        assert!(tracker.get_status(&run).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cleanup_older_than() {
        let tracker = TaskTracker::new();
        let (old, target, task) = ids(6);
        tracker.register_at(
            old.clone(),
            target.clone(),
            task.clone(),
            Utc::now() - chrono::Duration::hours(25),
        );
        let (fresh, _, _) = ids(7);
        tracker.register(fresh.clone(), target, task);

        let removed = tracker.cleanup_older_than(Duration::from_secs(24 * 3600));

        assert_eq!(removed, 1);
        assert!(tracker.get_status(&old).is_none());
        assert!(tracker.get_status(&fresh).is_some());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let tracker = TaskTracker::new();
        let (run, target, task) = ids(8);
        tracker.register(run.clone(), target, task);
        let value = serde_json::to_value(tracker.get_status(&run).unwrap()).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["agent_run_id"], "RUN-8");
    }
}
