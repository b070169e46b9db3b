//! Error types for the edgequake-video2md library.
//!
//! Three layers of failure exist and each has its own type:
//!
//! * [`Video2MdError`] — **Fatal to the caller**: the request itself is
//!   unusable (empty source, bad options), a backend identity is unknown, a
//!   task id does not exist. Returned as `Err(Video2MdError)` from the
//!   [`crate::orchestrator::Pipeline`] API.
//!
//! * Stage errors ([`AcquisitionError`], [`TranscriptionError`],
//!   [`SynthesisError`], [`SamplerError`]) — **Fatal to one task**: raised
//!   by a backend while a task runs. The orchestrator catches them at its
//!   boundary and records a [`crate::task::TaskFailure`] with a stable
//!   [`ErrorKind`] in the ledger; they never escape as raw backend errors.
//!
//! * [`MarkerResolutionError`] — **Non-fatal**: a marker in the synthesized
//!   text pointed at a timestamp or frame that does not exist. The weaver
//!   strips the marker and reports it on the [`crate::output::Document`].

use crate::registry::BackendFamily;
use crate::task::{TaskId, TaskState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-video2md public API.
#[derive(Debug, Error)]
pub enum Video2MdError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The submitted request is malformed (empty source, etc.).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A numeric option is out of its accepted range.
    #[error("Invalid parameter '{name}': {detail}")]
    InvalidParameter { name: &'static str, detail: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// No factory is registered for this identity.
    #[error("Unknown {family} backend '{identity}'\nRegistered: {available}")]
    UnknownBackend {
        family: BackendFamily,
        identity: String,
        available: String,
    },

    /// The factory ran but could not build the backend.
    #[error("Failed to initialise {family} backend '{identity}': {detail}")]
    BackendInit {
        family: BackendFamily,
        identity: String,
        detail: String,
    },

    // ── Ledger errors ─────────────────────────────────────────────────────
    /// No task with this id exists in the ledger.
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    /// A state change that the lifecycle does not allow.
    #[error("Illegal transition for task {id}: {from} -> {to}")]
    IllegalTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    /// The task store could not read or write a record.
    #[error("Task store error: {0}")]
    Storage(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output document.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure while fetching media for a task (stage `download`).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum AcquisitionError {
    #[error("Media file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("Source '{source_ref}' is not supported by the '{backend}' acquirer")]
    UnsupportedSource { source_ref: String, backend: String },

    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// An external helper (yt-dlp, ffprobe) exited unsuccessfully.
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },
}

/// Failure while converting audio to timestamped text (stage `transcribe`).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum TranscriptionError {
    #[error("Could not read media '{path}': {detail}")]
    MediaUnreadable { path: PathBuf, detail: String },

    #[error("Transcription request failed: {0}")]
    Request(String),

    #[error("Transcription API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unparseable transcription response: {0}")]
    Parse(String),
}

/// Failure while generating the document text (stage `generate`).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum SynthesisError {
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    #[error("LLM call failed after {retries} retries: {detail}")]
    Failed { retries: u32, detail: String },

    #[error("LLM returned an empty document")]
    EmptyResponse,
}

/// Failure while sampling or compositing frames (stage `frames`).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum SamplerError {
    /// Bad sampling parameter (`interval <= 0`, zero grid size).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Could not probe duration of '{path}': {detail}")]
    Probe { path: PathBuf, detail: String },

    #[error("Frame extraction at {timestamp:.3}s failed: {detail}")]
    Extract { timestamp: f64, detail: String },

    #[error("Frame image error: {0}")]
    Image(String),
}

/// A marker the weaver could not resolve. Never aborts a task.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum MarkerResolutionError {
    #[error("{marker}: no transcript segment at {at_secs:.3}s")]
    NoSegment { marker: String, at_secs: f64 },

    #[error("{marker}: no sampled frame within {tolerance_secs:.3}s of {at_secs:.3}s")]
    NoFrame {
        marker: String,
        at_secs: f64,
        tolerance_secs: f64,
    },

    #[error("{marker}: frame index {index} out of range ({available} frames)")]
    FrameIndexOutOfRange {
        marker: String,
        index: usize,
        available: usize,
    },

    #[error("{marker}: unparseable marker value")]
    Malformed { marker: String },
}

/// Stable error taxonomy recorded on failed tasks.
///
/// Callers match on this rather than on detail strings; the variant names
/// are part of the persisted ledger format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AcquisitionError,
    TranscriptionError,
    FrameSamplingError,
    SynthesisError,
    BackendInitError,
    UnknownBackendError,
    CancellationError,
    PersistError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AcquisitionError => "AcquisitionError",
            Self::TranscriptionError => "TranscriptionError",
            Self::FrameSamplingError => "FrameSamplingError",
            Self::SynthesisError => "SynthesisError",
            Self::BackendInitError => "BackendInitError",
            Self::UnknownBackendError => "UnknownBackendError",
            Self::CancellationError => "CancellationError",
            Self::PersistError => "PersistError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
