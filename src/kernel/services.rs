//! Fire-and-forget execution.
//!
//! `submit` acknowledges with a run id immediately; the orchestration runs on
//! its own tokio task, the tracker follows its progress and the completion
//! notice goes to the sink when the request names a callback.

use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::cleanup::{SweepConfig, TrackerSweeper};
use super::delivery::{CompletionNotice, CompletionSink};
use super::orchestrator::{ExecutionRequest, Orchestrator};
use super::tracker::{TaskTracker, TrackedTask};
use crate::types::{AgentError, ErrorCode, RunId};

#[derive(Clone)]
pub struct ExecutionService {
    orchestrator: Arc<Orchestrator>,
    tracker: Arc<TaskTracker>,
    sink: Option<Arc<dyn CompletionSink>>,
    sweeper: Option<Arc<TrackerSweeper>>,
}

impl fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionService")
            .field("orchestrator", &self.orchestrator)
            .field("tracked_runs", &self.tracker.len())
            .field("sink", &self.sink.is_some())
            .field("sweeping", &self.sweeper.is_some())
            .finish()
    }
}

impl ExecutionService {
    pub fn new(orchestrator: Orchestrator, tracker: Arc<TaskTracker>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            tracker,
            sink: None,
            sweeper: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sweep finished runs out of the tracker in the background.
    ///
    /// Must be called inside a tokio runtime. The sweeper stops when the
    /// last clone of the service is dropped.
    pub fn with_sweeper(mut self, config: SweepConfig) -> Self {
        let mut sweeper = TrackerSweeper::new(Arc::clone(&self.tracker), config);
        drop(sweeper.start());
        self.sweeper = Some(Arc::new(sweeper));
        self
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Register and start a run; returns before it does any work.
    pub fn submit(&self, request: ExecutionRequest) -> RunId {
        self.spawn(request).0
    }

    /// [`ExecutionService::submit`] plus a handle that resolves once the run
    /// is tracked as finished and its notice was handed to the sink.
    pub fn spawn(&self, request: ExecutionRequest) -> (RunId, JoinHandle<()>) {
        let run_id = RunId::generate();
        self.tracker.register(
            run_id.clone(),
            request.target_id.clone(),
            request.task_id.clone(),
        );
        tracing::info!(
            run_id = %run_id,
            target_id = %request.target_id,
            task = %request.task.name,
            "run_submitted"
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let tracker = Arc::clone(&self.tracker);
        let sink = self.sink.clone();
        let id = run_id.clone();

        let handle = tokio::spawn(async move {
            tracker.mark_running(&id);
            let callback = request.callback_url.clone();

            // Separate task so a panic surfaces as a JoinError here.
            let run = {
                let id = id.clone();
                tokio::spawn(async move { orchestrator.execute_as(id, &request).await })
            };

            let notice = match run.await {
                Ok(result) => match result.error.as_ref() {
                    Some(error) if error.code == ErrorCode::Timeout => {
                        tracing::error!(run_id = %id, "run_timed_out");
                        tracker.mark_failed(&id, error.clone());
                        CompletionNotice::failed(id.clone(), error.clone())
                    }
                    _ => {
                        tracing::info!(run_id = %id, success = result.success, "run_finished");
                        tracker.mark_completed(&id, &result);
                        CompletionNotice::completed(&result)
                    }
                },
                Err(e) => {
                    tracing::error!(run_id = %id, error = %e, "run_crashed");
                    let error = AgentError::new(
                        ErrorCode::InternalError,
                        "internal system error: JoinError",
                        Some(e.to_string()),
                    );
                    tracker.mark_failed(&id, error.clone());
                    CompletionNotice::failed(id.clone(), error)
                }
            };

            if let (Some(sink), Some(url)) = (sink, callback) {
                let report = sink.deliver(&url, &notice).await;
                if !report.success {
                    tracing::warn!(
                        run_id = %id,
                        attempts = report.attempts,
                        error = ?report.error,
                        "completion_not_delivered"
                    );
                }
            }
        });

        (run_id, handle)
    }

    /// Current snapshot of a submitted run.
    pub fn status(&self, run_id: &RunId) -> Option<TrackedTask> {
        self.tracker.get_status(run_id)
    }
}
