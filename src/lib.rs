//! # edgequake-video2md
//!
//! Turn a video (platform URL, direct media URL or local file) into
//! structured Markdown notes with timestamp links and embedded screenshots.
//!
//! ## Pipeline Overview
//!
//! ```text
//! video
//!  │
//!  ├─ 1. Download    Acquirer: local file, HTTP stream or yt-dlp
//!  ├─ 2. Transcribe  Transcriber: Whisper-compatible API → timed segments
//!  ├─ 3. Frames      ffmpeg stills every N seconds (concurrent with 2)
//!  ├─ 4. Generate    Synthesizer: LLM writes notes with [[ts:…]] / [[frame:…]] markers
//!  ├─ 5. Weave       markers → time-linked references and image embeds
//!  └─ 6. Persist     <output_dir>/<task_id>/note.md (+ frames/)
//! ```
//!
//! Each task is recorded in a [`TaskLedger`] and moves
//! `pending → processing → completed | failed`. Acquirers, transcribers and
//! synthesizers are looked up by identity in a [`BackendRegistry`], which
//! builds each one once and shares it across tasks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_video2md::{Pipeline, PipelineConfig, TaskOptions, TaskRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Transcription and synthesis both default to OpenAI (OPENAI_API_KEY).
//!     let pipeline = Pipeline::from_config(PipelineConfig::default());
//!     let options = TaskOptions::builder().screenshots(true).build()?;
//!     let id = pipeline
//!         .submit(TaskRequest::new("talk.mp4").with_options(options))
//!         .await?;
//!     let task = pipeline.wait(id).await?;
//!     println!("{:?} {:?}", task.state, task.result);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `video2md` binary (clap + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-video2md = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Tool | Needed for |
//! |------|------------|
//! | `yt-dlp` | platform URLs (YouTube, Bilibili, …) via the `yt-dlp`/`auto` acquirer |
//! | `ffmpeg`, `ffprobe` | screenshots and visual understanding |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    Acquirer, AcquisitionResult, SourceMetadata, SynthesisRequest, SynthesisResult, Synthesizer,
    Transcriber, TranscriptSegment, VisualBatch,
};
pub use config::{
    BackendConfig, DownloadQuality, NoteSection, NoteStyle, PipelineConfig, PipelineConfigBuilder,
    TaskOptions, TaskOptionsBuilder,
};
pub use error::{
    AcquisitionError, ErrorKind, MarkerResolutionError, SamplerError, SynthesisError,
    TranscriptionError, Video2MdError,
};
pub use ledger::{JsonFileTaskStore, MemoryTaskStore, TaskLedger, TaskStore};
pub use orchestrator::Pipeline;
pub use output::{Document, DocumentMetadata};
pub use pipeline::sampler::{FfmpegFrameExtractor, Frame, FrameExtractor, FrameSampler};
pub use pipeline::weave::Weaver;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use registry::{BackendFamily, BackendHandle, BackendRegistry};
pub use task::{BackendSelection, Stage, Task, TaskFailure, TaskId, TaskRequest, TaskState};
