//! Capability interfaces for the three interchangeable backend families.
//!
//! A backend is anything that implements one of these traits; the
//! orchestrator only ever sees `Arc<dyn Acquirer>`, `Arc<dyn Transcriber>`
//! and `Arc<dyn Synthesizer>` handed out by the
//! [`crate::registry::BackendRegistry`].
//!
//! Handles are shared across concurrently running tasks. Implementations
//! must be safe for concurrent use or serialise internally; the
//! orchestrator does not lock around calls.
//!
//! Built-in implementations:
//!
//! | Family | Identity | Module |
//! |--------|----------|--------|
//! | Acquirer | `local`, `http`, `yt-dlp`, `auto` | [`acquire`] |
//! | Transcriber | `whisper-api` | [`transcribe`] |
//! | Synthesizer | `llm` | [`synthesize`] |

pub mod acquire;
pub mod synthesize;
pub mod transcribe;

use crate::config::{DownloadQuality, NoteSection, NoteStyle};
use crate::error::{AcquisitionError, SynthesisError, TranscriptionError};
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Fetches raw media for a source reference.
#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Identity used in logs.
    fn name(&self) -> &str;

    async fn download(
        &self,
        source: &str,
        quality: DownloadQuality,
    ) -> Result<AcquisitionResult, AcquisitionError>;
}

/// Converts the audio track of a media file into ordered, timestamped text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, media_path: &Path)
        -> Result<Vec<TranscriptSegment>, TranscriptionError>;
}

/// Produces the note text, with unresolved markers, from a transcript.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`SynthesisRequest::visual_batches`] are understood.
    /// Frame grids are only composited for synthesizers that return `true`.
    fn supports_vision(&self) -> bool {
        false
    }

    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesisResult, SynthesisError>;
}

/// Where the media came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: Option<String>,
    /// The source reference as submitted (URL or path).
    pub url: String,
    pub uploader: Option<String>,
}

/// Output of an [`Acquirer`].
#[derive(Debug, Clone)]
pub struct AcquisitionResult {
    pub media_path: PathBuf,
    /// `None` when the acquirer could not determine it; the orchestrator
    /// then asks the frame extractor to probe the file.
    pub duration_secs: Option<f64>,
    pub metadata: SourceMetadata,
    /// Keeps a downloaded file's temp directory alive. The media is deleted
    /// once the last clone of this result is dropped.
    pub workspace: Option<Arc<TempDir>>,
}

impl AcquisitionResult {
    /// A result pointing at a file the acquirer does not own.
    pub fn borrowed(media_path: PathBuf, metadata: SourceMetadata) -> Self {
        Self {
            media_path,
            duration_secs: None,
            metadata,
            workspace: None,
        }
    }
}

/// One timed span of transcript text, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// A slice of transcript paired with a composite of the frames it spans.
#[derive(Debug, Clone)]
pub struct VisualBatch {
    pub start: f64,
    pub end: f64,
    pub transcript: String,
    pub image: EncodedImage,
}

/// Everything a [`Synthesizer`] needs for one generation.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub title: Option<String>,
    /// Full transcript, one `[HH:MM:SS] text` line per segment.
    pub transcript: String,
    pub style: NoteStyle,
    pub sections: Vec<NoteSection>,
    pub timestamp_links: bool,
    pub screenshots: bool,
    pub extras: Option<String>,
    pub language: Option<String>,
    /// Frame-aligned batches; empty unless visual understanding is enabled.
    pub visual_batches: Vec<VisualBatch>,
}

/// Text produced by a [`Synthesizer`], markers still unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub text: String,
    pub model: Option<String>,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl SynthesisResult {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}
