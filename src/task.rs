//! Task entity and its lifecycle.
//!
//! A task moves through `pending -> processing -> {completed | failed}` and
//! never back. [`TaskState::can_transition_to`] is the single definition of
//! the legal edges; the ledger refuses everything else.

use crate::config::TaskOptions;
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal edges: `pending -> processing`, `processing -> completed | failed`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage names, as recorded in failure payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Transcribe,
    Frames,
    Generate,
    Weave,
    Persist,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Transcribe => "transcribe",
            Self::Frames => "frames",
            Self::Generate => "generate",
            Self::Weave => "weave",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-request backend overrides. `None` falls back to the pipeline default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendSelection {
    pub acquirer: Option<String>,
    pub transcriber: Option<String>,
    pub synthesizer: Option<String>,
}

/// What a caller submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Remote URL or local media path.
    pub source: String,
    #[serde(default)]
    pub options: TaskOptions,
    #[serde(default)]
    pub backends: BackendSelection,
}

impl TaskRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            options: TaskOptions::default(),
            backends: BackendSelection::default(),
        }
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_backends(mut self, backends: BackendSelection) -> Self {
        self.backends = backends;
        self
    }
}

/// Error payload stored on a failed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    /// `None` when the failure happened before any stage ran.
    pub stage: Option<Stage>,
    pub detail: String,
}

impl TaskFailure {
    pub fn new(kind: ErrorKind, stage: Option<Stage>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            detail: detail.into(),
        }
    }

    pub fn at(kind: ErrorKind, stage: Stage, detail: impl Into<String>) -> Self {
        Self::new(kind, Some(stage), detail)
    }

    pub fn cancelled(stage: Option<Stage>) -> Self {
        let detail = match stage {
            Some(s) => format!("cancelled before stage '{s}'"),
            None => "cancelled before start".to_string(),
        };
        Self::new(ErrorKind::CancellationError, stage, detail)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} at {}: {}", self.kind, stage, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// A ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub request: TaskRequest,
    pub state: TaskState,
    /// Stage currently executing (informational; `None` outside `processing`).
    pub stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Path of the persisted document once `completed`.
    pub result: Option<PathBuf>,
    pub error: Option<TaskFailure>,
}

impl Task {
    pub fn new(request: TaskRequest) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            request,
            state: TaskState::Pending,
            stage: None,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }
}
