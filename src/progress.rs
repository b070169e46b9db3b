//! Progress-callback trait for task and stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator drives each task.
//!
//! Callbacks are the least-invasive integration point: the host can forward
//! events to a channel, a WebSocket or a terminal progress bar without the
//! library knowing how it communicates. The ledger remains the source of
//! truth for state; callbacks are notifications only.
//!
//! # Example
//!
//! ```rust
//! use edgequake_video2md::{PipelineConfig, PipelineProgressCallback, Stage, TaskId};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     finished: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for StageCounter {
//!     fn on_stage_complete(&self, _task: TaskId, _stage: Stage, _elapsed_ms: u64) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(StageCounter { finished: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::task::{Stage, TaskFailure, TaskId, TaskState};
use std::sync::Arc;

/// Called by the orchestrator as tasks progress.
///
/// Tasks run concurrently, so every method may be called from several
/// threads at once. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// A task's ledger state changed (including the initial `pending`).
    fn on_state_change(&self, task: TaskId, state: TaskState) {
        let _ = (task, state);
    }

    /// A stage is about to run.
    fn on_stage_start(&self, task: TaskId, stage: Stage) {
        let _ = (task, stage);
    }

    /// A stage finished successfully.
    fn on_stage_complete(&self, task: TaskId, stage: Stage, elapsed_ms: u64) {
        let _ = (task, stage, elapsed_ms);
    }

    /// The task failed; `failure` is what the ledger recorded.
    fn on_task_failed(&self, task: TaskId, failure: &TaskFailure) {
        let _ = (task, failure);
    }
}

/// A no-op implementation for callers that don't need events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<TaskState>>,
        stages: AtomicUsize,
        failures: AtomicUsize,
    }

    impl PipelineProgressCallback for Recorder {
        fn on_state_change(&self, _task: TaskId, state: TaskState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_stage_complete(&self, _task: TaskId, _stage: Stage, _elapsed_ms: u64) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_task_failed(&self, _task: TaskId, _failure: &TaskFailure) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let id = TaskId::new();
        cb.on_state_change(id, TaskState::Pending);
        cb.on_stage_start(id, Stage::Download);
        cb.on_stage_complete(id, Stage::Download, 12);
        cb.on_task_failed(
            id,
            &TaskFailure::at(ErrorKind::AcquisitionError, Stage::Download, "404"),
        );
    }

    #[test]
    fn recorder_receives_events_through_arc_dyn() {
        let recorder = Arc::new(Recorder::default());
        let cb: ProgressCallback = recorder.clone();
        let id = TaskId::new();

        cb.on_state_change(id, TaskState::Pending);
        cb.on_state_change(id, TaskState::Processing);
        cb.on_stage_complete(id, Stage::Download, 5);
        cb.on_stage_complete(id, Stage::Transcribe, 7);
        cb.on_task_failed(id, &TaskFailure::cancelled(Some(Stage::Generate)));

        assert_eq!(
            *recorder.states.lock().unwrap(),
            vec![TaskState::Pending, TaskState::Processing]
        );
        assert_eq!(recorder.stages.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.failures.load(Ordering::SeqCst), 1);
    }
}
