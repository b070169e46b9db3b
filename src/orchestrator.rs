//! Pipeline orchestrator: drive one task from source reference to persisted
//! document.
//!
//! ## Task flow
//!
//! ```text
//! submit ──▶ ledger: pending ──▶ (spawned) wait for a slot
//!                                    │
//!                                    ▼
//!                     ledger: processing, resolve backends
//!                                    │
//!     download ──▶ transcribe ═╦═ frames ──▶ generate ──▶ weave ──▶ persist
//!                              ╚═ (only when screenshots or visual
//!                                  understanding were requested)
//!                                    │
//!                                    ▼
//!                     ledger: completed | failed
//! ```
//!
//! Every stage runs under its own timeout. Cancellation is checked at each
//! stage boundary; a cancelled task ends `failed` with
//! [`ErrorKind::CancellationError`]. On any failure the task's output
//! directory is removed and downloaded media is dropped with the
//! acquisition result, so nothing is left behind.

use crate::backend::{AcquisitionResult, SynthesisRequest, TranscriptSegment, VisualBatch};
use crate::config::{PipelineConfig, TaskOptions};
use crate::error::{ErrorKind, SamplerError, Video2MdError};
use crate::ledger::TaskLedger;
use crate::output::{Document, DocumentMetadata};
use crate::pipeline::encode::encode_image;
use crate::pipeline::grid::compose_grids;
use crate::pipeline::postprocess::clean_markdown;
use crate::pipeline::sampler::{FfmpegFrameExtractor, Frame, FrameExtractor, FrameSampler};
use crate::pipeline::transcript::{format_transcript, normalize_segments, text_between};
use crate::pipeline::weave::Weaver;
use crate::registry::BackendRegistry;
use crate::task::{Stage, Task, TaskFailure, TaskId, TaskRequest, TaskState};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// File name of the persisted document inside `<output_dir>/<task_id>/`.
pub const DOCUMENT_FILE: &str = "note.md";

/// Directory for sampled frames inside `<output_dir>/<task_id>/`.
pub const FRAMES_DIR: &str = "frames";

struct RunningTask {
    cancel: CancellationToken,
    state: watch::Sender<TaskState>,
}

struct Inner {
    config: PipelineConfig,
    registry: Arc<BackendRegistry>,
    ledger: TaskLedger,
    extractor: Arc<dyn FrameExtractor>,
    permits: Arc<Semaphore>,
    running: Mutex<HashMap<TaskId, RunningTask>>,
    /// Request fingerprint → task whose document can be reused.
    cache: Mutex<HashMap<String, TaskId>>,
}

/// Backend identities chosen for one task.
#[derive(Debug, Clone)]
struct Identities {
    acquirer: String,
    transcriber: String,
    synthesizer: String,
}

/// The orchestrator. Cheap to clone; clones share tasks and backends.
///
/// ```rust,no_run
/// use edgequake_video2md::{Pipeline, PipelineConfig, TaskRequest, TaskState};
///
/// # async fn demo() -> Result<(), edgequake_video2md::Video2MdError> {
/// let pipeline = Pipeline::from_config(PipelineConfig::default());
/// let id = pipeline.submit(TaskRequest::new("https://www.youtube.com/watch?v=abc")).await?;
/// let task = pipeline.wait(id).await?;
/// if task.state == TaskState::Completed {
///     println!("notes at {}", task.result.unwrap().display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.inner.config)
            .field("running", &self.inner.running().len())
            .finish()
    }
}

impl Pipeline {
    /// Built-in backends, in-memory ledger, ffmpeg frame extraction.
    pub fn from_config(config: PipelineConfig) -> Self {
        Self::new(
            config,
            Arc::new(BackendRegistry::with_builtin()),
            TaskLedger::in_memory(),
        )
    }

    pub fn new(config: PipelineConfig, registry: Arc<BackendRegistry>, ledger: TaskLedger) -> Self {
        Self::with_frame_extractor(config, registry, ledger, Arc::new(FfmpegFrameExtractor::new()))
    }

    pub fn with_frame_extractor(
        config: PipelineConfig,
        registry: Arc<BackendRegistry>,
        ledger: TaskLedger,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                ledger,
                extractor,
                permits,
                running: Mutex::new(HashMap::new()),
                cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.inner.registry
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.inner.ledger
    }

    /// Validate, record as `pending`, schedule, and return at once.
    ///
    /// With `reuse_results` on, an identical earlier request (same source,
    /// options and backend identities) whose document still exists on disk
    /// returns that task's id instead of starting a new one.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId, Video2MdError> {
        let source = request.source.trim();
        if source.is_empty() {
            return Err(Video2MdError::InvalidRequest(
                "source reference is empty".to_string(),
            ));
        }
        request.options.validate()?;

        let mut request = request;
        request.source = request.source.trim().to_string();
        let identities = self.inner.identities(&request);

        let cache_key = if self.inner.config.reuse_results {
            let key = cache_key(&request, &identities)?;
            if let Some(id) = self.inner.cached_result(&key).await {
                info!(task_id = %id, source = %request.source, "reusing completed document");
                return Ok(id);
            }
            Some(key)
        } else {
            None
        };

        let task = self.inner.ledger.create(request).await?;
        let id = task.id;
        let cancel = CancellationToken::new();
        let (state_tx, _) = watch::channel(TaskState::Pending);
        self.inner.running().insert(
            id,
            RunningTask {
                cancel: cancel.clone(),
                state: state_tx,
            },
        );
        self.inner.notify_state(id, TaskState::Pending);
        info!(task_id = %id, source = %task.request.source, "task submitted");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run(task.id, task.request, identities, cancel, cache_key).await;
        });

        Ok(id)
    }

    /// Current ledger record.
    pub async fn get_status(&self, id: TaskId) -> Result<Task, Video2MdError> {
        self.inner.ledger.get(id).await
    }

    /// Every task in the ledger, oldest first.
    pub async fn list(&self) -> Result<Vec<Task>, Video2MdError> {
        self.inner.ledger.list().await
    }

    /// Request cancellation. Takes effect at the next stage boundary.
    ///
    /// Returns `false` when the task already finished.
    pub async fn cancel(&self, id: TaskId) -> Result<bool, Video2MdError> {
        let token = self.inner.running().get(&id).map(|r| r.cancel.clone());
        if let Some(token) = token {
            token.cancel();
            info!(task_id = %id, "cancellation requested");
            return Ok(true);
        }
        self.inner.ledger.get(id).await.map(|_| false)
    }

    /// Watch a task's state. The receiver starts at the current state and
    /// sees every later transition.
    pub async fn subscribe(&self, id: TaskId) -> Result<watch::Receiver<TaskState>, Video2MdError> {
        let live = self.inner.running().get(&id).map(|r| r.state.subscribe());
        if let Some(rx) = live {
            return Ok(rx);
        }
        let task = self.inner.ledger.get(id).await?;
        // Finished: a receiver whose sender is already gone still reads the value.
        let (_tx, rx) = watch::channel(task.state);
        Ok(rx)
    }

    /// Wait until the task reaches a terminal state and return its record.
    pub async fn wait(&self, id: TaskId) -> Result<Task, Video2MdError> {
        let mut rx = self.subscribe(id).await?;
        while !rx.borrow_and_update().is_terminal() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.inner.ledger.get(id).await
    }
}

fn cache_key(request: &TaskRequest, ids: &Identities) -> Result<String, Video2MdError> {
    serde_json::to_string(&(
        &request.source,
        &request.options,
        [&ids.acquirer, &ids.transcriber, &ids.synthesizer],
    ))
    .map_err(|e| Video2MdError::Internal(format!("cache key: {e}")))
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, HashMap<TaskId, RunningTask>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, TaskId>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn identities(&self, request: &TaskRequest) -> Identities {
        let pick = |chosen: &Option<String>, default: &str| {
            chosen
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Identities {
            acquirer: pick(&request.backends.acquirer, &self.config.acquirer),
            transcriber: pick(&request.backends.transcriber, &self.config.transcriber),
            synthesizer: pick(&request.backends.synthesizer, &self.config.synthesizer),
        }
    }

    async fn cached_result(&self, key: &str) -> Option<TaskId> {
        let id = *self.cache().get(key)?;
        let reusable = match self.ledger.get(id).await {
            Ok(task) => {
                task.state == TaskState::Completed
                    && task.result.as_deref().is_some_and(Path::exists)
            }
            Err(_) => false,
        };
        if reusable {
            Some(id)
        } else {
            self.cache().remove(key);
            None
        }
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Callback first, then watchers: `wait` must not return before the
    /// callback has seen the terminal state.
    fn notify_state(&self, id: TaskId, state: TaskState) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_state_change(id, state);
        }
        if let Some(running) = self.running().get(&id) {
            running.state.send_replace(state);
        }
    }

    /// Terminal transition: the task leaves the running set before anyone
    /// waiting on it wakes up, so `cancel` on a finished task reports `false`.
    fn finish(&self, id: TaskId, state: TaskState) {
        let running = self.running().remove(&id);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_state_change(id, state);
        }
        if let Some(running) = running {
            running.state.send_replace(state);
        }
    }

    fn notify_stage_start(&self, id: TaskId, stage: Stage) {
        debug!(task_id = %id, stage = %stage, "stage start");
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(id, stage);
        }
    }

    // ── Task driver ──────────────────────────────────────────────────────

    async fn run(
        self: Arc<Self>,
        id: TaskId,
        request: TaskRequest,
        ids: Identities,
        cancel: CancellationToken,
        cache_key: Option<String>,
    ) {
        let started = Instant::now();

        // Waiting for a slot is interruptible; stages are not.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        if let Err(e) = self.ledger.start(id).await {
            error!(task_id = %id, "could not start task: {}", e);
            self.running().remove(&id);
            return;
        }
        self.notify_state(id, TaskState::Processing);

        let task_dir = self.config.output_dir.join(id.to_string());
        let outcome = match permit {
            Some(_) => self.execute(id, &request, &ids, &cancel, &task_dir).await,
            None => Err(TaskFailure::cancelled(None)),
        };
        drop(permit);

        let outcome = match outcome {
            Ok(path) => match self.ledger.complete(id, path.clone()).await {
                Ok(_) => Ok(path),
                Err(e) => Err(TaskFailure::at(
                    ErrorKind::PersistError,
                    Stage::Persist,
                    e.to_string(),
                )),
            },
            Err(failure) => Err(failure),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(path) => {
                info!(
                    task_id = %id,
                    elapsed_ms,
                    "task completed: {}",
                    path.display()
                );
                if let Some(key) = cache_key {
                    self.cache().insert(key, id);
                }
                self.finish(id, TaskState::Completed);
            }
            Err(failure) => {
                discard_dir(&task_dir).await;
                warn!(
                    task_id = %id,
                    kind = %failure.kind,
                    stage = failure.stage.map(Stage::label).unwrap_or("none"),
                    elapsed_ms,
                    "task failed: {}",
                    failure.detail
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_task_failed(id, &failure);
                }
                if let Err(e) = self.ledger.fail(id, failure).await {
                    error!(task_id = %id, "could not record failure: {}", e);
                }
                self.finish(id, TaskState::Failed);
            }
        }
    }

    async fn execute(
        &self,
        id: TaskId,
        request: &TaskRequest,
        ids: &Identities,
        cancel: &CancellationToken,
        task_dir: &Path,
    ) -> Result<PathBuf, TaskFailure> {
        let cfg = &self.config;
        let opts = &request.options;

        // ── Backends (before any stage) ──────────────────────────────────
        checkpoint(cancel, None)?;
        let acquirer = self
            .registry
            .acquirer(&ids.acquirer, &cfg.acquirer_config)
            .await
            .map_err(resolution_failure)?;
        let transcriber = self
            .registry
            .transcriber(&ids.transcriber, &cfg.transcriber_config)
            .await
            .map_err(resolution_failure)?;
        let synthesizer = self
            .registry
            .synthesizer(&ids.synthesizer, &cfg.synthesizer_config)
            .await
            .map_err(resolution_failure)?;

        // ── Stage 1: Download ────────────────────────────────────────────
        self.enter(id, Stage::Download, cancel).await?;
        let media: AcquisitionResult = self
            .timed(
                id,
                Stage::Download,
                ErrorKind::AcquisitionError,
                cfg.download_timeout_secs,
                acquirer.download(&request.source, opts.quality),
            )
            .await?;
        debug!(task_id = %id, "media at {}", media.media_path.display());

        // ── Stage 2 (+3): Transcribe, sampling frames alongside ─────────
        let frames_dir = task_dir.join(FRAMES_DIR);
        self.enter(id, Stage::Transcribe, cancel).await?;
        let transcribe = self.timed(
            id,
            Stage::Transcribe,
            ErrorKind::TranscriptionError,
            cfg.transcribe_timeout_secs,
            transcriber.transcribe(&media.media_path),
        );
        let (segments, frames) = if opts.needs_frames() {
            self.notify_stage_start(id, Stage::Frames);
            let sample = self.timed(
                id,
                Stage::Frames,
                ErrorKind::FrameSamplingError,
                cfg.frames_timeout_secs,
                self.sample_frames(&media, opts.frame_interval_secs, &frames_dir),
            );
            tokio::try_join!(transcribe, sample)?
        } else {
            (transcribe.await?, Vec::new())
        };
        let segments = normalize_segments(segments);
        info!(
            task_id = %id,
            segments = segments.len(),
            frames = frames.len(),
            "transcript ready"
        );

        // ── Visual batches (vision synthesizers only) ────────────────────
        let visual_batches = if opts.visual_understanding && !frames.is_empty() {
            if synthesizer.supports_vision() {
                self.enter(id, Stage::Frames, cancel).await?;
                self.timed(
                    id,
                    Stage::Frames,
                    ErrorKind::FrameSamplingError,
                    cfg.frames_timeout_secs,
                    build_visual_batches(frames.clone(), opts, &segments, media.duration_secs),
                )
                .await?
            } else {
                warn!(
                    task_id = %id,
                    "synthesizer '{}' has no vision support; sending transcript only",
                    ids.synthesizer
                );
                Vec::new()
            }
        } else {
            Vec::new()
        };

        // ── Stage 4: Generate ────────────────────────────────────────────
        let synthesis_request = SynthesisRequest {
            title: media.metadata.title.clone(),
            transcript: format_transcript(&segments),
            style: opts.style,
            sections: opts.sections.clone(),
            timestamp_links: opts.timestamp_links,
            screenshots: opts.screenshots,
            extras: opts.extras.clone(),
            language: opts.language.clone(),
            visual_batches,
        };
        self.enter(id, Stage::Generate, cancel).await?;
        let mut synthesis = self
            .timed(
                id,
                Stage::Generate,
                ErrorKind::SynthesisError,
                cfg.generate_timeout_secs,
                synthesizer.generate(&synthesis_request),
            )
            .await?;
        synthesis.text = clean_markdown(&synthesis.text);
        debug!(
            task_id = %id,
            input_tokens = synthesis.input_tokens,
            output_tokens = synthesis.output_tokens,
            "synthesis done"
        );

        // ── Stage 5: Weave ───────────────────────────────────────────────
        self.enter(id, Stage::Weave, cancel).await?;
        let weave_start = Instant::now();
        // Frames sampled only for the model's eyes are not embedded.
        let embeddable: &[Frame] = if opts.screenshots { &frames } else { &[] };
        let tolerance = if cfg.marker_tolerance_secs > 0.0 {
            cfg.marker_tolerance_secs
        } else {
            opts.frame_interval_secs / 2.0
        };
        let document = Weaver::new(document_metadata(request, ids, &media, opts))
            .link_timestamps(opts.timestamp_links)
            .tolerance_secs(tolerance)
            .weave(&synthesis, &segments, embeddable);
        for unresolved in &document.unresolved {
            debug!(task_id = %id, "dropped marker: {}", unresolved);
        }
        if !document.unresolved.is_empty() {
            warn!(
                task_id = %id,
                "{} marker(s) could not be resolved and were removed",
                document.unresolved.len()
            );
        }
        self.stage_complete(id, Stage::Weave, weave_start);

        // ── Stage 6: Persist ─────────────────────────────────────────────
        self.enter(id, Stage::Persist, cancel).await?;
        let persist_start = Instant::now();
        if !opts.screenshots {
            discard_dir(&frames_dir).await;
        }
        let path = write_document(task_dir, &document)
            .await
            .map_err(|e| TaskFailure::at(ErrorKind::PersistError, Stage::Persist, e.to_string()))?;
        self.stage_complete(id, Stage::Persist, persist_start);

        Ok(path)
    }

    /// Boundary between stages: honour cancellation, record the stage.
    async fn enter(
        &self,
        id: TaskId,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<(), TaskFailure> {
        checkpoint(cancel, Some(stage))?;
        self.ledger
            .set_stage(id, stage)
            .await
            .map_err(|e| TaskFailure::at(ErrorKind::PersistError, stage, e.to_string()))?;
        self.notify_stage_start(id, stage);
        Ok(())
    }

    /// Run one stage's work under its timeout and map its error to the
    /// stage's kind.
    async fn timed<T, E, F>(
        &self,
        id: TaskId,
        stage: Stage,
        kind: ErrorKind,
        timeout_secs: u64,
        work: F,
    ) -> Result<T, TaskFailure>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let start = Instant::now();
        match tokio::time::timeout(Duration::from_secs(timeout_secs), work).await {
            Ok(Ok(value)) => {
                self.stage_complete(id, stage, start);
                Ok(value)
            }
            Ok(Err(e)) => Err(TaskFailure::at(kind, stage, e.to_string())),
            Err(_) => Err(TaskFailure::at(
                kind,
                stage,
                format!("timed out after {timeout_secs}s"),
            )),
        }
    }

    fn stage_complete(&self, id: TaskId, stage: Stage, start: Instant) {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(task_id = %id, stage = %stage, elapsed_ms, "stage complete");
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(id, stage, elapsed_ms);
        }
    }

    async fn sample_frames(
        &self,
        media: &AcquisitionResult,
        interval: f64,
        frames_dir: &Path,
    ) -> Result<Vec<Frame>, SamplerError> {
        let sampler = FrameSampler::new(Arc::clone(&self.extractor), frames_dir);
        let stream = match media.duration_secs {
            Some(duration) => {
                sampler
                    .sample_with_duration(&media.media_path, interval, duration)
                    .await?
            }
            None => sampler.sample(&media.media_path, interval).await?,
        };
        stream.try_collect().await
    }
}

fn checkpoint(cancel: &CancellationToken, next: Option<Stage>) -> Result<(), TaskFailure> {
    if cancel.is_cancelled() {
        Err(TaskFailure::cancelled(next))
    } else {
        Ok(())
    }
}

fn resolution_failure(e: Video2MdError) -> TaskFailure {
    let kind = match e {
        Video2MdError::UnknownBackend { .. } => ErrorKind::UnknownBackendError,
        _ => ErrorKind::BackendInitError,
    };
    TaskFailure::new(kind, None, e.to_string())
}

fn document_metadata(
    request: &TaskRequest,
    ids: &Identities,
    media: &AcquisitionResult,
    opts: &TaskOptions,
) -> DocumentMetadata {
    let source = if media.metadata.url.trim().is_empty() {
        request.source.clone()
    } else {
        media.metadata.url.clone()
    };
    DocumentMetadata {
        title: media.metadata.title.clone(),
        source,
        uploader: media.metadata.uploader.clone(),
        duration_secs: media.duration_secs,
        style: opts.style,
        sections: opts.sections.clone(),
        acquirer: ids.acquirer.clone(),
        transcriber: ids.transcriber.clone(),
        synthesizer: ids.synthesizer.clone(),
        model: None,
        frame_count: 0,
    }
}

/// Grid the frames and pair each grid with the transcript it covers.
///
/// Grid `k` covers `[start_k, start_{k+1})`; the last grid runs to the media
/// end (or one interval past its last frame when the duration is unknown).
async fn build_visual_batches(
    frames: Vec<Frame>,
    opts: &TaskOptions,
    segments: &[TranscriptSegment],
    duration: Option<f64>,
) -> Result<Vec<VisualBatch>, SamplerError> {
    let grids = compose_grids(frames, opts.grid_size).await?;
    let mut batches = Vec::with_capacity(grids.len());
    for (i, grid) in grids.iter().enumerate() {
        let end = grids
            .get(i + 1)
            .map(|next| next.start)
            .or(duration)
            .unwrap_or(grid.end + opts.frame_interval_secs);
        let image = encode_image(&grid.image).map_err(|e| SamplerError::Image(e.to_string()))?;
        batches.push(VisualBatch {
            start: grid.start,
            end,
            transcript: text_between(segments, grid.start, end),
            image,
        });
    }
    Ok(batches)
}

/// Write `note.md` atomically: temp file, then rename.
async fn write_document(task_dir: &Path, document: &Document) -> Result<PathBuf, Video2MdError> {
    let path = task_dir.join(DOCUMENT_FILE);
    tokio::fs::create_dir_all(task_dir)
        .await
        .map_err(|e| Video2MdError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, document.render())
        .await
        .map_err(|e| Video2MdError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| Video2MdError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    Ok(path)
}

async fn discard_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoteStyle;

    #[test]
    fn cache_key_covers_options_and_backends() {
        let ids = Identities {
            acquirer: "auto".into(),
            transcriber: "whisper-api".into(),
            synthesizer: "llm".into(),
        };
        let a = TaskRequest::new("https://v.example/a");
        let b = a.clone().with_options(
            TaskOptions::builder()
                .style(NoteStyle::Minimal)
                .build()
                .unwrap(),
        );
        let mut other_llm = ids.clone();
        other_llm.synthesizer = "llm-local".into();

        let ka = cache_key(&a, &ids).unwrap();
        assert_eq!(ka, cache_key(&a.clone(), &ids).unwrap());
        assert_ne!(ka, cache_key(&b, &ids).unwrap());
        assert_ne!(ka, cache_key(&a, &other_llm).unwrap());
    }

    #[test]
    fn resolution_errors_map_to_kinds() {
        let unknown = resolution_failure(Video2MdError::UnknownBackend {
            family: crate::registry::BackendFamily::Acquirer,
            identity: "ftp".into(),
            available: "auto".into(),
        });
        assert_eq!(unknown.kind, ErrorKind::UnknownBackendError);
        assert_eq!(unknown.stage, None);

        let init = resolution_failure(Video2MdError::BackendInit {
            family: crate::registry::BackendFamily::Synthesizer,
            identity: "llm".into(),
            detail: "no key".into(),
        });
        assert_eq!(init.kind, ErrorKind::BackendInitError);
    }

    #[test]
    fn cancelled_checkpoint_names_next_stage() {
        let token = CancellationToken::new();
        assert!(checkpoint(&token, Some(Stage::Generate)).is_ok());
        token.cancel();
        let failure = checkpoint(&token, Some(Stage::Generate)).unwrap_err();
        assert_eq!(failure.kind, ErrorKind::CancellationError);
        assert_eq!(failure.stage, Some(Stage::Generate));
    }
}
