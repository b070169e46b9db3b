//! Configuration types for video-to-notes conversion.
//!
//! Two structs carry every knob:
//!
//! * [`PipelineConfig`] — process-wide: admission limit, output directory,
//!   per-stage timeouts, default backend identities and their settings.
//!   Built once via [`PipelineConfigBuilder`] and shared by all tasks.
//! * [`TaskOptions`] — per-request: note style, sections, enhancement flags,
//!   frame interval and grid size. Part of the submitted
//!   [`crate::task::TaskRequest`] and persisted with it in the ledger.

use crate::error::Video2MdError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Process-wide pipeline configuration.
///
/// # Example
/// ```rust
/// use edgequake_video2md::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .max_concurrent_tasks(2)
///     .output_dir("notes")
///     .transcriber("whisper-api")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Tasks allowed to run at once. Default: 4.
    ///
    /// Acquisition saturates bandwidth and transcription saturates compute or
    /// API quota long before the orchestrator itself is a bottleneck. Tasks
    /// beyond this limit stay `pending` until a slot frees up.
    pub max_concurrent_tasks: usize,

    /// Root directory for persisted documents. Each task writes to
    /// `<output_dir>/<task_id>/`. Default: `./video2md-output`.
    pub output_dir: PathBuf,

    /// Timeout for the acquisition stage in seconds. Default: 600.
    pub download_timeout_secs: u64,

    /// Timeout for the transcription stage in seconds. Default: 1800.
    pub transcribe_timeout_secs: u64,

    /// Timeout for frame sampling and grid composition in seconds. Default: 300.
    pub frames_timeout_secs: u64,

    /// Timeout for the synthesis stage in seconds. Default: 600.
    pub generate_timeout_secs: u64,

    /// Acquirer identity used when a request does not name one. Default: "auto".
    pub acquirer: String,

    /// Transcriber identity used when a request does not name one. Default: "whisper-api".
    pub transcriber: String,

    /// Synthesizer identity used when a request does not name one. Default: "llm".
    pub synthesizer: String,

    /// Settings handed to the acquirer factory on first construction.
    pub acquirer_config: BackendConfig,

    /// Settings handed to the transcriber factory on first construction.
    pub transcriber_config: BackendConfig,

    /// Settings handed to the synthesizer factory on first construction.
    pub synthesizer_config: BackendConfig,

    /// Reuse a completed document for an identical request. Default: true.
    ///
    /// The key covers the source, every option and every backend identity,
    /// so a request that differs in any of them never sees a cached result.
    pub reuse_results: bool,

    /// Maximum distance between a frame marker and a sampled frame, in seconds.
    /// `0.0` (default) means half the task's frame interval.
    pub marker_tolerance_secs: f64,

    /// Optional observer for task and stage events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            output_dir: PathBuf::from("video2md-output"),
            download_timeout_secs: 600,
            transcribe_timeout_secs: 1800,
            frames_timeout_secs: 300,
            generate_timeout_secs: 600,
            acquirer: "auto".to_string(),
            transcriber: "whisper-api".to_string(),
            synthesizer: "llm".to_string(),
            acquirer_config: BackendConfig::default(),
            transcriber_config: BackendConfig::default(),
            synthesizer_config: BackendConfig::default(),
            reuse_results: true,
            marker_tolerance_secs: 0.0,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_concurrent_tasks", &self.max_concurrent_tasks)
            .field("output_dir", &self.output_dir)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("transcribe_timeout_secs", &self.transcribe_timeout_secs)
            .field("frames_timeout_secs", &self.frames_timeout_secs)
            .field("generate_timeout_secs", &self.generate_timeout_secs)
            .field("acquirer", &self.acquirer)
            .field("transcriber", &self.transcriber)
            .field("synthesizer", &self.synthesizer)
            .field("reuse_results", &self.reuse_results)
            .field("marker_tolerance_secs", &self.marker_tolerance_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_concurrent_tasks(mut self, n: usize) -> Self {
        self.config.max_concurrent_tasks = n;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn transcribe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.transcribe_timeout_secs = secs;
        self
    }

    pub fn frames_timeout_secs(mut self, secs: u64) -> Self {
        self.config.frames_timeout_secs = secs;
        self
    }

    pub fn generate_timeout_secs(mut self, secs: u64) -> Self {
        self.config.generate_timeout_secs = secs;
        self
    }

    pub fn acquirer(mut self, identity: impl Into<String>) -> Self {
        self.config.acquirer = identity.into();
        self
    }

    pub fn transcriber(mut self, identity: impl Into<String>) -> Self {
        self.config.transcriber = identity.into();
        self
    }

    pub fn synthesizer(mut self, identity: impl Into<String>) -> Self {
        self.config.synthesizer = identity.into();
        self
    }

    pub fn acquirer_config(mut self, cfg: BackendConfig) -> Self {
        self.config.acquirer_config = cfg;
        self
    }

    pub fn transcriber_config(mut self, cfg: BackendConfig) -> Self {
        self.config.transcriber_config = cfg;
        self
    }

    pub fn synthesizer_config(mut self, cfg: BackendConfig) -> Self {
        self.config.synthesizer_config = cfg;
        self
    }

    pub fn reuse_results(mut self, v: bool) -> Self {
        self.config.reuse_results = v;
        self
    }

    pub fn marker_tolerance_secs(mut self, secs: f64) -> Self {
        self.config.marker_tolerance_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Video2MdError> {
        let c = &self.config;
        if c.max_concurrent_tasks == 0 {
            return Err(Video2MdError::InvalidParameter {
                name: "max_concurrent_tasks",
                detail: "must be ≥ 1".into(),
            });
        }
        let timeouts = [
            ("download_timeout_secs", c.download_timeout_secs),
            ("transcribe_timeout_secs", c.transcribe_timeout_secs),
            ("frames_timeout_secs", c.frames_timeout_secs),
            ("generate_timeout_secs", c.generate_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(Video2MdError::InvalidParameter {
                    name,
                    detail: "timeout must be ≥ 1 second".into(),
                });
            }
        }
        if !c.marker_tolerance_secs.is_finite() || c.marker_tolerance_secs < 0.0 {
            return Err(Video2MdError::InvalidParameter {
                name: "marker_tolerance_secs",
                detail: format!("must be a non-negative number, got {}", c.marker_tolerance_secs),
            });
        }
        for (family, identity) in [
            ("acquirer", &c.acquirer),
            ("transcriber", &c.transcriber),
            ("synthesizer", &c.synthesizer),
        ] {
            if identity.trim().is_empty() {
                return Err(Video2MdError::InvalidRequest(format!(
                    "default {family} identity is empty"
                )));
            }
        }
        Ok(self.config)
    }
}

/// String settings handed to a backend factory.
///
/// Untyped: each backend documents the keys it reads
/// (`model`, `provider`, `base_url`, `api_key_env`, `binary`, ...), and the
/// registry never inspects them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendConfig {
    settings: BTreeMap<String, String>,
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.insert(key.into(), value.into());
    }

    /// Non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse `key` as `T`, falling back to `default` when absent.
    pub fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, String> {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| format!("setting '{key}' has invalid value '{raw}'")),
            None => Ok(default),
        }
    }
}

// ── Per-task options ─────────────────────────────────────────────────────

/// Per-request options.
///
/// # Example
/// ```rust
/// use edgequake_video2md::{NoteSection, NoteStyle, TaskOptions};
///
/// let options = TaskOptions::builder()
///     .style(NoteStyle::Academic)
///     .section(NoteSection::Summary)
///     .screenshots(true)
///     .frame_interval_secs(5.0)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    /// Writing style requested from the synthesizer. Default: [`NoteStyle::Detailed`].
    pub style: NoteStyle,

    /// Extra sections requested on top of the main notes. Default: none.
    pub sections: Vec<NoteSection>,

    /// Ask the synthesizer for `[[ts:…]]` markers linking back into the video. Default: true.
    pub timestamp_links: bool,

    /// Sample frames and ask for `[[frame:…]]` markers to embed them. Default: false.
    pub screenshots: bool,

    /// Send frame grids alongside transcript batches to a vision-capable
    /// synthesizer. Implies frame sampling. Default: false.
    pub visual_understanding: bool,

    /// Seconds between sampled frames. Default: 10.
    pub frame_interval_secs: f64,

    /// Frames per grid edge when compositing for visual understanding.
    /// `3` packs 9 consecutive frames into one image. Range 1–6. Default: 3.
    pub grid_size: u32,

    /// Media quality hint for the acquirer. Default: [`DownloadQuality::Medium`].
    pub quality: DownloadQuality,

    /// Free-form instructions appended to the synthesis prompt.
    pub extras: Option<String>,

    /// Output language for the notes (e.g. "English"). `None` follows the transcript.
    pub language: Option<String>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            style: NoteStyle::default(),
            sections: Vec::new(),
            timestamp_links: true,
            screenshots: false,
            visual_understanding: false,
            frame_interval_secs: 10.0,
            grid_size: 3,
            quality: DownloadQuality::default(),
            extras: None,
            language: None,
        }
    }
}

impl TaskOptions {
    pub fn builder() -> TaskOptionsBuilder {
        TaskOptionsBuilder {
            options: Self::default(),
        }
    }

    /// Frames are sampled when either enhancement needs them.
    pub fn needs_frames(&self) -> bool {
        self.screenshots || self.visual_understanding
    }

    /// Check ranges. Called by [`TaskOptionsBuilder::build`] and again on submit,
    /// since options can also arrive deserialised.
    pub fn validate(&self) -> Result<(), Video2MdError> {
        if !self.frame_interval_secs.is_finite() || self.frame_interval_secs <= 0.0 {
            return Err(Video2MdError::InvalidParameter {
                name: "frame_interval_secs",
                detail: format!("must be > 0, got {}", self.frame_interval_secs),
            });
        }
        if !(1..=6).contains(&self.grid_size) {
            return Err(Video2MdError::InvalidParameter {
                name: "grid_size",
                detail: format!("must be 1–6, got {}", self.grid_size),
            });
        }
        Ok(())
    }
}

/// Builder for [`TaskOptions`].
#[derive(Debug)]
pub struct TaskOptionsBuilder {
    options: TaskOptions,
}

impl TaskOptionsBuilder {
    pub fn style(mut self, style: NoteStyle) -> Self {
        self.options.style = style;
        self
    }

    pub fn section(mut self, section: NoteSection) -> Self {
        if !self.options.sections.contains(&section) {
            self.options.sections.push(section);
        }
        self
    }

    pub fn timestamp_links(mut self, v: bool) -> Self {
        self.options.timestamp_links = v;
        self
    }

    pub fn screenshots(mut self, v: bool) -> Self {
        self.options.screenshots = v;
        self
    }

    pub fn visual_understanding(mut self, v: bool) -> Self {
        self.options.visual_understanding = v;
        self
    }

    pub fn frame_interval_secs(mut self, secs: f64) -> Self {
        self.options.frame_interval_secs = secs;
        self
    }

    pub fn grid_size(mut self, n: u32) -> Self {
        self.options.grid_size = n;
        self
    }

    pub fn quality(mut self, q: DownloadQuality) -> Self {
        self.options.quality = q;
        self
    }

    pub fn extras(mut self, extras: impl Into<String>) -> Self {
        self.options.extras = Some(extras.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.options.language = Some(language.into());
        self
    }

    pub fn build(self) -> Result<TaskOptions, Video2MdError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Writing style for the generated notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStyle {
    /// Bullet points, key facts only.
    Minimal,
    /// Full structured notes with explanations. (default)
    #[default]
    Detailed,
    /// Formal register, definitions and references called out.
    Academic,
    /// Step-by-step, reproducible instructions.
    Tutorial,
    /// Decisions, action items and numbers first.
    Business,
}

impl NoteStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Detailed => "detailed",
            Self::Academic => "academic",
            Self::Tutorial => "tutorial",
            Self::Business => "business",
        }
    }
}

/// Optional sections added to the notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteSection {
    /// Table of contents at the top.
    Toc,
    /// Closing summary.
    Summary,
    /// Glossary of terms introduced in the video.
    Glossary,
}

impl NoteSection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toc => "toc",
            Self::Summary => "summary",
            Self::Glossary => "glossary",
        }
    }
}

/// Media quality hint. Transcription only needs audio, so lower is faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadQuality {
    Low,
    #[default]
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_config_builds() {
        let cfg = PipelineConfig::builder().build().unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 4);
        assert_eq!(cfg.synthesizer, "llm");
        assert!(cfg.reuse_results);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = PipelineConfig::builder()
            .max_concurrent_tasks(0)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Video2MdError::InvalidParameter {
                name: "max_concurrent_tasks",
                ..
            }
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = PipelineConfig::builder()
            .generate_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("generate_timeout_secs"));
    }

    #[test]
    fn options_reject_non_positive_interval() {
        for bad in [0.0, -1.0, f64::NAN] {
            let err = TaskOptions::builder()
                .frame_interval_secs(bad)
                .build()
                .unwrap_err();
            assert!(matches!(
                err,
                Video2MdError::InvalidParameter {
                    name: "frame_interval_secs",
                    ..
                }
            ));
        }
    }

    #[test]
    fn options_reject_grid_out_of_range() {
        assert!(TaskOptions::builder().grid_size(0).build().is_err());
        assert!(TaskOptions::builder().grid_size(7).build().is_err());
        assert!(TaskOptions::builder().grid_size(1).build().is_ok());
    }

    #[test]
    fn sections_are_deduplicated() {
        let opts = TaskOptions::builder()
            .section(NoteSection::Toc)
            .section(NoteSection::Toc)
            .section(NoteSection::Summary)
            .build()
            .unwrap();
        assert_eq!(opts.sections, vec![NoteSection::Toc, NoteSection::Summary]);
    }

    #[test]
    fn needs_frames_follows_enhancements() {
        assert!(!TaskOptions::default().needs_frames());
        let opts = TaskOptions::builder().visual_understanding(true).build().unwrap();
        assert!(opts.needs_frames());
    }

    #[test]
    fn options_deserialise_with_defaults() {
        let opts: TaskOptions = serde_json::from_str(r#"{"screenshots": true}"#).unwrap();
        assert!(opts.screenshots);
        assert_eq!(opts.grid_size, 3);
        assert_eq!(opts.style, NoteStyle::Detailed);
    }

    #[test]
    fn backend_config_ignores_blank_values() {
        let cfg = BackendConfig::new().with("model", "  ").with("base_url", "http://x");
        assert_eq!(cfg.get("model"), None);
        assert_eq!(cfg.get_or("model", "whisper-1"), "whisper-1");
        assert_eq!(cfg.get("base_url"), Some("http://x"));
    }

    #[test]
    fn backend_config_parse_or() {
        let cfg = BackendConfig::new().with("max_retries", "5").with("bad", "x");
        assert_eq!(cfg.parse_or("max_retries", 3u32).unwrap(), 5);
        assert_eq!(cfg.parse_or("missing", 3u32).unwrap(), 3);
        assert!(cfg.parse_or("bad", 3u32).is_err());
    }
}
