//! CLI binary for edgequake-video2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / `TaskOptions`, runs one task and prints where the
//! notes were written.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_video2md::{
    BackendConfig, BackendFamily, BackendRegistry, DownloadQuality, JsonFileTaskStore,
    NoteSection, NoteStyle, Pipeline, PipelineConfig, PipelineProgressCallback, ProgressCallback,
    Stage, TaskFailure, TaskId, TaskLedger, TaskOptions, TaskRequest, TaskState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner naming the current stage, plus a log line
/// per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Queued");
        bar.set_message("waiting for a slot…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_state_change(&self, _task: TaskId, state: TaskState) {
        match state {
            TaskState::Processing => {
                self.bar.set_prefix("Starting");
                self.bar.set_message("resolving backends…");
            }
            TaskState::Completed | TaskState::Failed => self.bar.finish_and_clear(),
            TaskState::Pending => {}
        }
    }

    fn on_stage_start(&self, _task: TaskId, stage: Stage) {
        let msg = match stage {
            Stage::Download => "fetching media…",
            Stage::Transcribe => "transcribing audio…",
            Stage::Frames => "sampling frames…",
            Stage::Generate => "writing notes…",
            Stage::Weave => "linking timestamps and screenshots…",
            Stage::Persist => "saving…",
        };
        self.bar.set_prefix(stage.label());
        self.bar.set_message(msg);
    }

    fn on_stage_complete(&self, _task: TaskId, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<10}  {}",
            green("✓"),
            stage.label(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_task_failed(&self, _task: TaskId, failure: &TaskFailure) {
        let stage = failure.stage.map(Stage::label).unwrap_or("setup");
        // Keep long backend errors on one terminal line.
        let msg = if failure.detail.chars().count() > 100 {
            let cut: String = failure.detail.chars().take(99).collect();
            format!("{cut}\u{2026}")
        } else {
            failure.detail.clone()
        };
        self.bar.println(format!(
            "  {} {:<10}  {}  {}",
            red("✗"),
            stage,
            red(failure.kind.as_str()),
            dim(&msg),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Notes for a YouTube video, written to ./video2md-output/<task-id>/note.md
  video2md https://www.youtube.com/watch?v=dQw4w9WgXcQ

  # Local file, academic style with summary and glossary
  video2md lecture.mp4 --style academic --sections summary,glossary

  # Embed a screenshot wherever the notes reference one (needs ffmpeg)
  video2md talk.mp4 --screenshots --interval 5

  # Let a vision model look at 3x3 frame grids while writing
  video2md demo.mp4 --visual --grid 3 --model gpt-4.1

  # Keep a task ledger across runs and list it
  video2md --ledger-dir ~/.video2md talk.mp4
  video2md --ledger-dir ~/.video2md --list-tasks

  # Print the note to stdout as well
  video2md talk.mp4 --print

BACKENDS:
  Family        Identity        Notes
  ───────────   ─────────────   ──────────────────────────────────────────
  acquirer      auto (default)  local file, direct media URL, else yt-dlp
  acquirer      local           local files only
  acquirer      http            direct media URLs (.mp4, .mp3, …)
  acquirer      yt-dlp          YouTube, Bilibili and other platforms
  transcriber   whisper-api     OpenAI-compatible /audio/transcriptions
  synthesizer   llm             any edgequake-llm provider

EXTERNAL TOOLS:
  yt-dlp            platform URLs
  ffmpeg, ffprobe   --screenshots and --visual

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (transcription and default synthesis)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Turn videos into structured Markdown notes.
#[derive(Parser, Debug)]
#[command(
    name = "video2md",
    version,
    about = "Turn videos into structured Markdown notes",
    long_about = "Download a video (platform URL, direct media URL or local file), transcribe it, \
and have an LLM write structured notes with clickable timestamps and optional screenshots. \
Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint \
(Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Video URL or local media path.
    #[arg(required_unless_present_any = ["list_tasks", "list_backends"])]
    source: Option<String>,

    /// Root directory for notes; each task writes to <DIR>/<task-id>/.
    #[arg(short, long, env = "VIDEO2MD_OUTPUT_DIR", default_value = "video2md-output")]
    output_dir: PathBuf,

    /// Note style.
    #[arg(long, env = "VIDEO2MD_STYLE", value_enum, default_value = "detailed")]
    style: StyleArg,

    /// Extra sections: toc, summary, glossary (comma separated).
    #[arg(long, env = "VIDEO2MD_SECTIONS", value_enum, value_delimiter = ',')]
    sections: Vec<SectionArg>,

    /// Do not ask for timestamp links.
    #[arg(long, env = "VIDEO2MD_NO_TIMESTAMPS")]
    no_timestamps: bool,

    /// Embed screenshots referenced by the notes.
    #[arg(long, env = "VIDEO2MD_SCREENSHOTS")]
    screenshots: bool,

    /// Send frame grids to a vision-capable model.
    #[arg(long, env = "VIDEO2MD_VISUAL")]
    visual: bool,

    /// Seconds between sampled frames.
    #[arg(long, env = "VIDEO2MD_INTERVAL", default_value_t = 10.0)]
    interval: f64,

    /// Frames per grid edge for --visual (1–6).
    #[arg(long, env = "VIDEO2MD_GRID", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=6))]
    grid: u32,

    /// Download quality hint.
    #[arg(long, env = "VIDEO2MD_QUALITY", value_enum, default_value = "medium")]
    quality: QualityArg,

    /// Output language for the notes (default: follow the transcript).
    #[arg(long, env = "VIDEO2MD_LANGUAGE")]
    language: Option<String>,

    /// Extra instructions appended to the prompt.
    #[arg(long, env = "VIDEO2MD_EXTRAS")]
    extras: Option<String>,

    /// Acquirer identity.
    #[arg(long, env = "VIDEO2MD_ACQUIRER", default_value = "auto")]
    acquirer: String,

    /// Transcriber identity.
    #[arg(long, env = "VIDEO2MD_TRANSCRIBER", default_value = "whisper-api")]
    transcriber: String,

    /// Synthesizer identity.
    #[arg(long, env = "VIDEO2MD_SYNTHESIZER", default_value = "llm")]
    synthesizer: String,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "VIDEO2MD_TEMPERATURE")]
    temperature: Option<f32>,

    /// Retries on LLM failure.
    #[arg(long, env = "VIDEO2MD_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "VIDEO2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Transcription model (default: whisper-1).
    #[arg(long, env = "VIDEO2MD_WHISPER_MODEL")]
    whisper_model: Option<String>,

    /// Base URL of an OpenAI-compatible transcription API.
    #[arg(long, env = "VIDEO2MD_WHISPER_URL")]
    whisper_url: Option<String>,

    /// Cookies file passed to yt-dlp.
    #[arg(long, env = "VIDEO2MD_COOKIES")]
    cookies: Option<PathBuf>,

    /// Persist the task ledger as JSON in this directory.
    #[arg(long, env = "VIDEO2MD_LEDGER_DIR")]
    ledger_dir: Option<PathBuf>,

    /// List tasks in the ledger and exit.
    #[arg(long, requires = "ledger_dir")]
    list_tasks: bool,

    /// List registered backends and exit.
    #[arg(long)]
    list_backends: bool,

    /// Also print the finished note to stdout.
    #[arg(long)]
    print: bool,

    /// Disable progress output.
    #[arg(long, env = "VIDEO2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VIDEO2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VIDEO2MD_QUIET")]
    quiet: bool,

    /// Download stage timeout in seconds.
    #[arg(long, env = "VIDEO2MD_DOWNLOAD_TIMEOUT", default_value_t = 600)]
    download_timeout: u64,

    /// Transcription stage timeout in seconds.
    #[arg(long, env = "VIDEO2MD_TRANSCRIBE_TIMEOUT", default_value_t = 1800)]
    transcribe_timeout: u64,

    /// Synthesis stage timeout in seconds.
    #[arg(long, env = "VIDEO2MD_GENERATE_TIMEOUT", default_value_t = 600)]
    generate_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StyleArg {
    Minimal,
    Detailed,
    Academic,
    Tutorial,
    Business,
}

impl From<StyleArg> for NoteStyle {
    fn from(v: StyleArg) -> Self {
        match v {
            StyleArg::Minimal => NoteStyle::Minimal,
            StyleArg::Detailed => NoteStyle::Detailed,
            StyleArg::Academic => NoteStyle::Academic,
            StyleArg::Tutorial => NoteStyle::Tutorial,
            StyleArg::Business => NoteStyle::Business,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SectionArg {
    Toc,
    Summary,
    Glossary,
}

impl From<SectionArg> for NoteSection {
    fn from(v: SectionArg) -> Self {
        match v {
            SectionArg::Toc => NoteSection::Toc,
            SectionArg::Summary => NoteSection::Summary,
            SectionArg::Glossary => NoteSection::Glossary,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum QualityArg {
    Low,
    Medium,
    High,
}

impl From<QualityArg> for DownloadQuality {
    fn from(v: QualityArg) -> Self {
        match v {
            QualityArg::Low => DownloadQuality::Low,
            QualityArg::Medium => DownloadQuality::Medium,
            QualityArg::High => DownloadQuality::High,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers stage progress; keep library INFO logs out of its way.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let registry = Arc::new(BackendRegistry::with_builtin());

    if cli.list_backends {
        for family in [
            BackendFamily::Acquirer,
            BackendFamily::Transcriber,
            BackendFamily::Synthesizer,
        ] {
            println!("{:<12} {}", family.as_str(), registry.identities(family).join(", "));
        }
        return Ok(());
    }

    let ledger = match cli.ledger_dir {
        Some(ref dir) => {
            let store = JsonFileTaskStore::open(dir)
                .await
                .with_context(|| format!("Failed to open task ledger at {}", dir.display()))?;
            TaskLedger::new(Arc::new(store))
        }
        None => TaskLedger::in_memory(),
    };

    if cli.list_tasks {
        for task in ledger.list().await.context("Failed to read task ledger")? {
            let outcome = match (&task.result, &task.error) {
                (Some(path), _) => path.display().to_string(),
                (None, Some(failure)) => failure.to_string(),
                (None, None) => task.stage.map(Stage::label).unwrap_or("").to_string(),
            };
            println!(
                "{}  {:<10}  {}  {}  {}",
                task.id,
                task.state.as_str(),
                task.created_at.format("%Y-%m-%d %H:%M"),
                task.request.source,
                dim(&outcome),
            );
        }
        return Ok(());
    }

    let Some(source) = cli.source.clone() else {
        bail!("no video source given");
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;
    let options = build_options(&cli)?;

    let pipeline = Pipeline::new(config, registry, ledger);

    // ── Run ──────────────────────────────────────────────────────────────
    if !cli.quiet {
        eprintln!("{} {}", cyan("◆"), bold(&format!("Taking notes on {source}")));
    }
    let id = pipeline
        .submit(TaskRequest::new(source).with_options(options))
        .await
        .context("Task was rejected")?;

    let task = tokio::select! {
        task = pipeline.wait(id) => task?,
        _ = tokio::signal::ctrl_c() => {
            pipeline.cancel(id).await?;
            pipeline.wait(id).await?
        }
    };

    match (task.state, task.result) {
        (TaskState::Completed, Some(path)) => {
            if cli.print {
                let note = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                print!("{note}");
            }
            if !cli.quiet {
                eprintln!("{}  {}", green("✔"), bold(&path.display().to_string()));
            }
            if !cli.print {
                println!("{}", path.display());
            }
            Ok(())
        }
        _ => match task.error {
            Some(failure) => bail!("task {id} failed: {failure}"),
            None => bail!("task {id} ended in state {}", task.state),
        },
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut synthesizer = BackendConfig::new();
    if let Some(ref m) = cli.model {
        synthesizer.set("model", m);
    }
    if let Some(ref p) = cli.provider {
        synthesizer.set("provider", p);
    }
    if let Some(t) = cli.temperature {
        synthesizer.set("temperature", t.to_string());
    }
    if let Some(r) = cli.max_retries {
        synthesizer.set("max_retries", r.to_string());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        synthesizer.set("system_prompt", prompt);
    }

    let mut transcriber = BackendConfig::new();
    if let Some(ref m) = cli.whisper_model {
        transcriber.set("model", m);
    }
    if let Some(ref url) = cli.whisper_url {
        transcriber.set("base_url", url);
    }

    let mut acquirer = BackendConfig::new();
    if let Some(ref cookies) = cli.cookies {
        acquirer.set("cookies", cookies.display().to_string());
    }

    let mut builder = PipelineConfig::builder()
        .max_concurrent_tasks(1)
        .output_dir(&cli.output_dir)
        .download_timeout_secs(cli.download_timeout)
        .transcribe_timeout_secs(cli.transcribe_timeout)
        .generate_timeout_secs(cli.generate_timeout)
        .acquirer(&cli.acquirer)
        .transcriber(&cli.transcriber)
        .synthesizer(&cli.synthesizer)
        .acquirer_config(acquirer)
        .transcriber_config(transcriber)
        .synthesizer_config(synthesizer);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to per-task `TaskOptions`.
fn build_options(cli: &Cli) -> Result<TaskOptions> {
    let mut builder = TaskOptions::builder()
        .style(cli.style.into())
        .timestamp_links(!cli.no_timestamps)
        .screenshots(cli.screenshots)
        .visual_understanding(cli.visual)
        .frame_interval_secs(cli.interval)
        .grid_size(cli.grid)
        .quality(cli.quality.into());

    for section in &cli.sections {
        builder = builder.section((*section).into());
    }
    if let Some(ref language) = cli.language {
        builder = builder.language(language);
    }
    if let Some(ref extras) = cli.extras {
        builder = builder.extras(extras);
    }

    builder.build().context("Invalid task options")
}
