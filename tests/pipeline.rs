//! Integration tests for the pipeline orchestrator.
//!
//! Every backend here is an in-process mock registered through
//! [`BackendRegistry::new`], so these tests need no network, API keys,
//! yt-dlp or ffmpeg.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_video2md::{
    AcquisitionError, AcquisitionResult, Acquirer, BackendRegistry, BackendSelection,
    DownloadQuality, ErrorKind, FrameExtractor, Pipeline, PipelineConfig,
    PipelineProgressCallback, SamplerError, SourceMetadata, Stage, SynthesisError,
    SynthesisRequest, SynthesisResult, Synthesizer, TaskFailure, TaskId, TaskLedger, TaskOptions,
    TaskRequest, TaskState, Transcriber, TranscriptSegment, TranscriptionError, Video2MdError,
};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

const SOURCE_URL: &str = "https://video.example/watch?v=abc";

// ── Mock backends ────────────────────────────────────────────────────────────

/// Returns a fixed, non-existent media path with known duration.
#[derive(Clone)]
struct FixedAcquirer;

#[async_trait]
impl Acquirer for FixedAcquirer {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn download(
        &self,
        source: &str,
        _quality: DownloadQuality,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        Ok(AcquisitionResult {
            media_path: PathBuf::from("/media/demo.mp4"),
            duration_secs: Some(10.0),
            metadata: SourceMetadata {
                title: Some("Demo".to_string()),
                url: source.to_string(),
                uploader: None,
            },
            workspace: None,
        })
    }
}

/// Blocks inside `download` until released.
#[derive(Clone)]
struct GatedAcquirer {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Acquirer for GatedAcquirer {
    fn name(&self) -> &str {
        "gated"
    }

    async fn download(
        &self,
        source: &str,
        quality: DownloadQuality,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        self.started.notify_one();
        self.release.notified().await;
        FixedAcquirer.download(source, quality).await
    }
}

/// Reports the source as missing.
#[derive(Clone)]
struct MissingAcquirer;

#[async_trait]
impl Acquirer for MissingAcquirer {
    fn name(&self) -> &str {
        "missing"
    }

    async fn download(
        &self,
        source: &str,
        _quality: DownloadQuality,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        Err(AcquisitionError::FileNotFound {
            path: PathBuf::from(source),
        })
    }
}

#[derive(Clone)]
struct FixedTranscriber;

#[async_trait]
impl Transcriber for FixedTranscriber {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn transcribe(&self, _media: &Path) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
        Ok(vec![
            TranscriptSegment::new(0.0, 2.0, "Hello"),
            TranscriptSegment::new(2.0, 4.0, "World"),
        ])
    }
}

#[derive(Clone)]
struct FailingTranscriber;

#[async_trait]
impl Transcriber for FailingTranscriber {
    fn name(&self) -> &str {
        "failing"
    }

    async fn transcribe(&self, _media: &Path) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
        Err(TranscriptionError::Api {
            status: 500,
            body: "upstream exploded".to_string(),
        })
    }
}

/// Outlives any reasonable transcription timeout.
#[derive(Clone)]
struct SlowTranscriber;

#[async_trait]
impl Transcriber for SlowTranscriber {
    fn name(&self) -> &str {
        "slow"
    }

    async fn transcribe(&self, media: &Path) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        FixedTranscriber.transcribe(media).await
    }
}

/// Gives up after its retries.
#[derive(Clone)]
struct FailingSynthesizer;

#[async_trait]
impl Synthesizer for FailingSynthesizer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _request: &SynthesisRequest) -> Result<SynthesisResult, SynthesisError> {
        Err(SynthesisError::Failed {
            retries: 2,
            detail: "429 rate limited".to_string(),
        })
    }
}

/// Returns fixed text and records every request it receives.
#[derive(Clone)]
struct ScriptedSynthesizer {
    text: String,
    vision: bool,
    requests: Arc<Mutex<Vec<SynthesisRequest>>>,
}

impl ScriptedSynthesizer {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            vision: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesisResult, SynthesisError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(SynthesisResult {
            text: self.text.clone(),
            model: Some("mock-1".to_string()),
            input_tokens: 10,
            output_tokens: 20,
        })
    }
}

/// Writes a small solid PNG for every requested timestamp.
struct PngExtractor {
    duration: f64,
}

#[async_trait]
impl FrameExtractor for PngExtractor {
    async fn probe_duration(&self, _media: &Path) -> Result<f64, SamplerError> {
        Ok(self.duration)
    }

    async fn extract(&self, _media: &Path, timestamp: f64, dest: &Path) -> Result<(), SamplerError> {
        let shade = (timestamp as u8).wrapping_mul(20);
        RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))
            .save(dest)
            .map_err(|e| SamplerError::Extract {
                timestamp,
                detail: e.to_string(),
            })
    }
}

/// Knows the duration but cannot decode any frame.
struct BrokenExtractor;

#[async_trait]
impl FrameExtractor for BrokenExtractor {
    async fn probe_duration(&self, _media: &Path) -> Result<f64, SamplerError> {
        Ok(10.0)
    }

    async fn extract(&self, _media: &Path, timestamp: f64, _dest: &Path) -> Result<(), SamplerError> {
        Err(SamplerError::Extract {
            timestamp,
            detail: "corrupt keyframe".to_string(),
        })
    }
}

/// Records every state change and stage start.
#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<TaskState>>,
    stages: Mutex<Vec<Stage>>,
    failures: Mutex<Vec<TaskFailure>>,
}

impl PipelineProgressCallback for Recorder {
    fn on_state_change(&self, _task: TaskId, state: TaskState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_stage_start(&self, _task: TaskId, stage: Stage) {
        self.stages.lock().unwrap().push(stage);
    }

    fn on_task_failed(&self, _task: TaskId, failure: &TaskFailure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Harness {
    pipeline: Pipeline,
    output: TempDir,
}

impl Harness {
    fn task_dir(&self, id: TaskId) -> PathBuf {
        self.output.path().join(id.to_string())
    }
}

/// `RUST_LOG=edgequake_video2md=debug cargo test --test pipeline` shows the
/// orchestrator's logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A registry with `fixed` and `missing` acquirers, `fixed`, `failing` and
/// `slow` transcribers, a `failing` synthesizer and the given synthesizer
/// registered as `scripted`.
fn registry_with(synth: ScriptedSynthesizer) -> BackendRegistry {
    let registry = BackendRegistry::new();
    registry.register_acquirer("fixed", |_cfg| async { Ok(FixedAcquirer) });
    registry.register_transcriber("fixed", |_cfg| async { Ok(FixedTranscriber) });
    registry.register_acquirer("missing", |_cfg| async { Ok(MissingAcquirer) });
    registry.register_transcriber("failing", |_cfg| async { Ok(FailingTranscriber) });
    registry.register_transcriber("slow", |_cfg| async { Ok(SlowTranscriber) });
    registry.register_synthesizer("failing", |_cfg| async { Ok(FailingSynthesizer) });
    registry.register_synthesizer("scripted", move |_cfg| {
        let synth = synth.clone();
        async move { Ok(synth) }
    });
    registry
}

fn harness_with(
    registry: BackendRegistry,
    configure: impl FnOnce(edgequake_video2md::PipelineConfigBuilder) -> edgequake_video2md::PipelineConfigBuilder,
) -> Harness {
    harness_with_extractor(registry, Arc::new(PngExtractor { duration: 10.0 }), configure)
}

fn harness_with_extractor(
    registry: BackendRegistry,
    extractor: Arc<dyn FrameExtractor>,
    configure: impl FnOnce(edgequake_video2md::PipelineConfigBuilder) -> edgequake_video2md::PipelineConfigBuilder,
) -> Harness {
    init_tracing();
    let output = tempfile::tempdir().unwrap();
    let builder = PipelineConfig::builder()
        .output_dir(output.path())
        .acquirer("fixed")
        .transcriber("fixed")
        .synthesizer("scripted");
    let config = configure(builder).build().unwrap();
    let pipeline = Pipeline::with_frame_extractor(
        config,
        Arc::new(registry),
        TaskLedger::in_memory(),
        extractor,
    );
    Harness { pipeline, output }
}

fn harness(synth: ScriptedSynthesizer) -> Harness {
    harness_with(registry_with(synth), |b| b)
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn timestamps_are_linked_to_the_source() {
    let synth = ScriptedSynthesizer::new("# Notes\n\nIntro [[ts:0]] and later [[ts:2.5]].\n");
    let h = harness(synth.clone());

    let id = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert_eq!(task.state, TaskState::Completed, "{:?}", task.error);
    let path = task.result.expect("completed task has a result");
    assert_eq!(path, h.task_dir(id).join("note.md"));

    let note = std::fs::read_to_string(&path).unwrap();
    assert!(note.starts_with("---\n"));
    assert!(note.contains("title: \"Demo\""));
    assert!(note.contains("model: \"mock-1\""));
    assert!(note.contains("unresolved_markers: 0"));
    assert!(note.contains(&format!("[00:00:00]({SOURCE_URL}&t=0)")));
    assert!(note.contains(&format!("[00:00:02]({SOURCE_URL}&t=2)")));
    assert!(!note.contains("[[ts:"));
    assert!(!note.contains("!["));
    assert!(!h.task_dir(id).join("frames").exists());

    let request = &synth.requests.lock().unwrap()[0];
    assert_eq!(request.title.as_deref(), Some("Demo"));
    assert!(request.transcript.contains("[00:00:00] Hello"));
    assert!(request.visual_batches.is_empty());
}

#[tokio::test]
async fn unmatched_frame_marker_is_stripped() {
    let synth = ScriptedSynthesizer::new("See [[frame:2]] and [[frame:500]] here.\n");
    let h = harness(synth);

    let options = TaskOptions::builder()
        .screenshots(true)
        .frame_interval_secs(2.0)
        .build()
        .unwrap();
    let id = h
        .pipeline
        .submit(TaskRequest::new(SOURCE_URL).with_options(options))
        .await
        .unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert_eq!(task.state, TaskState::Completed, "{:?}", task.error);
    let note = std::fs::read_to_string(task.result.unwrap()).unwrap();
    assert!(note.contains("See ![00:00:02](frames/frame_00001.png) and here."));
    assert!(note.contains("unresolved_markers: 1"));
    assert!(note.contains("frames: 5"));
    assert!(!note.contains("[[frame"));

    let frames = h.task_dir(id).join("frames");
    assert!(frames.join("frame_00000.png").exists());
    assert!(frames.join("frame_00004.png").exists());
    assert!(!frames.join("frame_00005.png").exists());
}

#[tokio::test]
async fn vision_synthesizer_receives_frame_batches() {
    let mut synth = ScriptedSynthesizer::new("Slides [[ts:0]].\n");
    synth.vision = true;
    let h = harness(synth.clone());

    let options = TaskOptions::builder()
        .visual_understanding(true)
        .frame_interval_secs(2.0)
        .grid_size(2)
        .build()
        .unwrap();
    let id = h
        .pipeline
        .submit(TaskRequest::new(SOURCE_URL).with_options(options))
        .await
        .unwrap();
    let task = h.pipeline.wait(id).await.unwrap();
    assert_eq!(task.state, TaskState::Completed, "{:?}", task.error);

    let requests = synth.requests.lock().unwrap();
    let batches = &requests[0].visual_batches;
    // 5 frames (0..8 s) in 2×2 grids → 4 + 1
    assert_eq!(batches.len(), 2);
    assert_eq!((batches[0].start, batches[0].end), (0.0, 8.0));
    assert_eq!((batches[1].start, batches[1].end), (8.0, 10.0));
    assert!(batches[0].transcript.contains("Hello"));
    assert_eq!(batches[0].image.mime_type, "image/png");

    // Frames seen only by the model are not kept.
    assert!(!h.task_dir(id).join("frames").exists());
}

#[tokio::test]
async fn non_vision_synthesizer_gets_transcript_only() {
    let synth = ScriptedSynthesizer::new("Plain.\n");
    let h = harness(synth.clone());

    let options = TaskOptions::builder()
        .visual_understanding(true)
        .build()
        .unwrap();
    let id = h
        .pipeline
        .submit(TaskRequest::new(SOURCE_URL).with_options(options))
        .await
        .unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert_eq!(task.state, TaskState::Completed);
    assert!(synth.requests.lock().unwrap()[0].visual_batches.is_empty());
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn states_and_stages_advance_in_order() {
    let recorder = Arc::new(Recorder::default());
    let cb = Arc::clone(&recorder) as Arc<dyn PipelineProgressCallback>;
    let h = harness_with(registry_with(ScriptedSynthesizer::new("Hi.\n")), |b| {
        b.progress_callback(cb)
    });

    let id = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    let task = h.pipeline.wait(id).await.unwrap();
    assert_eq!(task.state, TaskState::Completed);

    assert_eq!(
        *recorder.states.lock().unwrap(),
        vec![TaskState::Pending, TaskState::Processing, TaskState::Completed]
    );
    assert_eq!(
        *recorder.stages.lock().unwrap(),
        vec![
            Stage::Download,
            Stage::Transcribe,
            Stage::Generate,
            Stage::Weave,
            Stage::Persist
        ]
    );
    assert!(task.created_at <= task.updated_at);
}

#[tokio::test]
async fn submit_returns_before_the_task_runs() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let registry = registry_with(ScriptedSynthesizer::new("Hi.\n"));
    {
        let gate = GatedAcquirer {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        };
        registry.register_acquirer("gated", move |_cfg| {
            let gate = gate.clone();
            async move { Ok(gate) }
        });
    }
    let h = harness_with(registry, |b| b.acquirer("gated"));

    let id = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    let status = h.pipeline.get_status(id).await.unwrap();
    assert!(!status.state.is_terminal());

    started.notified().await;
    let status = h.pipeline.get_status(id).await.unwrap();
    assert_eq!(status.state, TaskState::Processing);
    assert_eq!(status.stage, Some(Stage::Download));

    release.notify_one();
    let task = h.pipeline.wait(id).await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(h.pipeline.list().await.unwrap().len(), 1);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transcription_failure_stops_the_task() {
    let recorder = Arc::new(Recorder::default());
    let cb = Arc::clone(&recorder) as Arc<dyn PipelineProgressCallback>;
    let synth = ScriptedSynthesizer::new("never used");
    let h = harness_with(registry_with(synth.clone()), |b| {
        b.transcriber("failing").progress_callback(cb)
    });

    let id = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert_eq!(task.state, TaskState::Failed);
    assert!(task.result.is_none());
    let failure = task.error.expect("failed task records its error");
    assert_eq!(failure.kind, ErrorKind::TranscriptionError);
    assert_eq!(failure.stage, Some(Stage::Transcribe));
    assert!(failure.detail.contains("upstream exploded"));

    assert_eq!(synth.calls(), 0);
    assert!(!h.task_dir(id).exists());
    assert_eq!(recorder.failures.lock().unwrap().len(), 1);
    assert_eq!(
        recorder.states.lock().unwrap().last(),
        Some(&TaskState::Failed)
    );
}

#[tokio::test]
async fn acquisition_failure_is_recorded_at_download() {
    let synth = ScriptedSynthesizer::new("never used");
    let h = harness_with(registry_with(synth.clone()), |b| b.acquirer("missing"));

    let id = h.pipeline.submit(TaskRequest::new("/nope/talk.mp4")).await.unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert_eq!(task.state, TaskState::Failed);
    let failure = task.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::AcquisitionError);
    assert_eq!(failure.stage, Some(Stage::Download));
    assert!(failure.detail.contains("/nope/talk.mp4"));
    assert_eq!(synth.calls(), 0);
}

#[tokio::test]
async fn synthesis_failure_writes_no_document() {
    let h = harness_with(registry_with(ScriptedSynthesizer::new("unused")), |b| {
        b.synthesizer("failing")
    });

    let id = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert_eq!(task.state, TaskState::Failed);
    assert!(task.result.is_none());
    let failure = task.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::SynthesisError);
    assert_eq!(failure.stage, Some(Stage::Generate));
    assert!(failure.detail.contains("429 rate limited"));
    assert!(!h.task_dir(id).join("note.md").exists());
    assert!(!h.task_dir(id).exists());
}

#[tokio::test]
async fn frame_sampling_failure_is_recorded_at_frames() {
    let synth = ScriptedSynthesizer::new("never used");
    let h = harness_with_extractor(
        registry_with(synth.clone()),
        Arc::new(BrokenExtractor),
        |b| b,
    );

    let options = TaskOptions::builder().screenshots(true).build().unwrap();
    let id = h
        .pipeline
        .submit(TaskRequest::new(SOURCE_URL).with_options(options))
        .await
        .unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert_eq!(task.state, TaskState::Failed);
    let failure = task.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::FrameSamplingError);
    assert_eq!(failure.stage, Some(Stage::Frames));
    assert!(failure.detail.contains("corrupt keyframe"));
    assert_eq!(synth.calls(), 0);
    assert!(!h.task_dir(id).exists());
}

#[tokio::test]
async fn stage_timeout_fails_with_the_stage_kind() {
    let synth = ScriptedSynthesizer::new("never used");
    let h = harness_with(registry_with(synth.clone()), |b| {
        b.transcriber("slow").transcribe_timeout_secs(1)
    });

    let started = std::time::Instant::now();
    let id = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    assert_eq!(task.state, TaskState::Failed);
    let failure = task.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::TranscriptionError);
    assert_eq!(failure.stage, Some(Stage::Transcribe));
    assert_eq!(failure.detail, "timed out after 1s");
    assert_eq!(synth.calls(), 0);
}

#[tokio::test]
async fn unknown_backend_fails_before_any_stage() {
    let h = harness(ScriptedSynthesizer::new("Hi.\n"));

    let request = TaskRequest::new(SOURCE_URL).with_backends(BackendSelection {
        acquirer: Some("ftp".to_string()),
        ..Default::default()
    });
    let id = h.pipeline.submit(request).await.unwrap();
    let task = h.pipeline.wait(id).await.unwrap();

    assert_eq!(task.state, TaskState::Failed);
    let failure = task.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::UnknownBackendError);
    assert_eq!(failure.stage, None);
    assert!(failure.detail.contains("ftp"));
    assert!(failure.detail.contains("fixed"));
}

#[tokio::test]
async fn backend_init_failure_is_reported() {
    let registry = registry_with(ScriptedSynthesizer::new("Hi.\n"));
    registry.register_synthesizer("broken", |_cfg| async {
        Err::<ScriptedSynthesizer, _>("OPENAI_API_KEY is not set".to_string())
    });
    let h = harness_with(registry, |b| b.synthesizer("broken"));

    let id = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    let failure = h.pipeline.wait(id).await.unwrap().error.unwrap();
    assert_eq!(failure.kind, ErrorKind::BackendInitError);
    assert_eq!(failure.stage, None);
}

#[tokio::test]
async fn cancel_during_download_stops_at_next_stage() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let synth = ScriptedSynthesizer::new("never used");
    let registry = registry_with(synth.clone());
    {
        let gate = GatedAcquirer {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        };
        registry.register_acquirer("gated", move |_cfg| {
            let gate = gate.clone();
            async move { Ok(gate) }
        });
    }
    let h = harness_with(registry, |b| b.acquirer("gated"));

    let id = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    started.notified().await;
    assert!(h.pipeline.cancel(id).await.unwrap());
    release.notify_one();

    let task = h.pipeline.wait(id).await.unwrap();
    assert_eq!(task.state, TaskState::Failed);
    let failure = task.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::CancellationError);
    assert_eq!(failure.stage, Some(Stage::Transcribe));
    assert_eq!(synth.calls(), 0);
    assert!(!h.task_dir(id).exists());

    // Finished tasks cannot be cancelled again.
    assert!(!h.pipeline.cancel(id).await.unwrap());
}

#[tokio::test]
async fn cancel_while_queued() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let registry = registry_with(ScriptedSynthesizer::new("Hi.\n"));
    {
        let gate = GatedAcquirer {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        };
        registry.register_acquirer("gated", move |_cfg| {
            let gate = gate.clone();
            async move { Ok(gate) }
        });
    }
    let h = harness_with(registry, |b| b.acquirer("gated").max_concurrent_tasks(1));

    let first = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    started.notified().await;

    let second = h
        .pipeline
        .submit(TaskRequest::new("https://video.example/other"))
        .await
        .unwrap();
    assert_eq!(
        h.pipeline.get_status(second).await.unwrap().state,
        TaskState::Pending
    );
    assert!(h.pipeline.cancel(second).await.unwrap());

    let queued = h.pipeline.wait(second).await.unwrap();
    assert_eq!(queued.state, TaskState::Failed);
    let failure = queued.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::CancellationError);
    assert_eq!(failure.stage, None);

    release.notify_one();
    assert_eq!(
        h.pipeline.wait(first).await.unwrap().state,
        TaskState::Completed
    );
}

// ── Submission ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_requests_are_rejected_up_front() {
    let h = harness(ScriptedSynthesizer::new("Hi.\n"));

    let err = tokio_test::assert_err!(h.pipeline.submit(TaskRequest::new("   ")).await);
    assert!(matches!(err, Video2MdError::InvalidRequest(_)));

    let options = TaskOptions {
        frame_interval_secs: 0.0,
        ..Default::default()
    };
    let err = tokio_test::assert_err!(
        h.pipeline
            .submit(TaskRequest::new(SOURCE_URL).with_options(options))
            .await
    );
    assert!(matches!(
        err,
        Video2MdError::InvalidParameter {
            name: "frame_interval_secs",
            ..
        }
    ));

    assert!(h.pipeline.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn identical_request_reuses_completed_document() {
    let synth = ScriptedSynthesizer::new("Hi [[ts:0]].\n");
    let h = harness(synth.clone());

    let first = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    h.pipeline.wait(first).await.unwrap();

    let again = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(synth.calls(), 1);

    // Different options are a different document.
    let options = TaskOptions::builder().timestamp_links(false).build().unwrap();
    let other = h
        .pipeline
        .submit(TaskRequest::new(SOURCE_URL).with_options(options))
        .await
        .unwrap();
    assert_ne!(other, first);
    h.pipeline.wait(other).await.unwrap();
    assert_eq!(synth.calls(), 2);
}

#[tokio::test]
async fn reuse_can_be_disabled() {
    let synth = ScriptedSynthesizer::new("Hi.\n");
    let h = harness_with(registry_with(synth.clone()), |b| b.reuse_results(false));

    let first = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    h.pipeline.wait(first).await.unwrap();
    let second = h.pipeline.submit(TaskRequest::new(SOURCE_URL)).await.unwrap();
    h.pipeline.wait(second).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(synth.calls(), 2);
}
