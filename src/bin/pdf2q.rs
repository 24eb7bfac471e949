//! CLI binary for pdf2questions.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` / `BatchConfig`, wires the default renderer, detector
//! and archive writer, and reports progress.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2questions::{
    BatchConfig, BatchOutcome, BatchProgressCallback, BatchRunner, DetectionSchema,
    DirectoryArchive, ExtractionConfig, Extractor, JobSummary, PdfiumRenderer, ProgressCallback,
    StopReason, VlmDetector,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}\u{2026}", &s[..i]),
        None => s.to_string(),
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one progress bar per round plus per-document
/// log lines. Documents complete out of order, so every line names its file.
struct CliProgressCallback {
    bar: ProgressBar,
    questions: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input directory…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            questions: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, round: u32, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} docs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix(format!("Round {round}"));
        self.bar.reset_elapsed();
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_round_start(&self, round: u32, pending: usize) {
        self.activate_bar(round, pending);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Round {round}: {pending} documents"))
        ));
    }

    fn on_job_start(&self, source: &Path) {
        self.bar.set_message(file_name(source));
    }

    fn on_job_retry(&self, source: &Path, attempt: u32, max_attempts: u32, error: &str) {
        self.bar.println(format!(
            "  {} {}  attempt {}/{}  {}",
            yellow("↻"),
            file_name(source),
            attempt,
            max_attempts,
            dim(&truncate(error, 80)),
        ));
    }

    fn on_job_complete(&self, source: &Path, summary: &JobSummary) {
        self.questions.fetch_add(summary.questions, Ordering::SeqCst);
        let warnings = if summary.warnings > 0 {
            yellow(&format!("  {} warnings", summary.warnings))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "  {} {}  {}{}",
            green("✓"),
            file_name(source),
            dim(&format!(
                "{} pages → {} questions",
                summary.pages, summary.questions
            )),
            warnings,
        ));
        self.bar.inc(1);
    }

    fn on_job_failed(&self, source: &Path, attempts: u32, error: &str) {
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            file_name(source),
            red(&truncate(error, 80)),
            dim(&format!("after {attempts} attempts")),
        ));
        self.bar.inc(1);
    }

    fn on_round_complete(&self, round: u32, succeeded: usize, failed: usize) {
        self.bar.println(format!(
            "  {} round {}: {} succeeded, {} failed",
            dim("─"),
            round,
            succeeded,
            failed
        ));
    }

    fn on_batch_complete(&self, outcome: &BatchOutcome) {
        self.bar.finish_and_clear();
        let questions = self.questions.load(Ordering::SeqCst);
        if outcome.failed.is_empty() {
            eprintln!(
                "{} {} documents processed, {} questions extracted",
                green("✔"),
                bold(&outcome.completed.len().to_string()),
                bold(&questions.to_string()),
            );
        } else {
            eprintln!(
                "{} {} documents processed, {} failed  ({})",
                if outcome.completed.is_empty() {
                    red("✘")
                } else {
                    yellow("⚠")
                },
                bold(&outcome.completed.len().to_string()),
                red(&outcome.failed.len().to_string()),
                stop_reason_text(outcome.stop_reason),
            );
        }
    }
}

fn stop_reason_text(reason: StopReason) -> &'static str {
    match reason {
        StopReason::AllSucceeded => "all documents succeeded",
        StopReason::NothingPending => "nothing left to process",
        StopReason::NoProgress => "stopped: a round made no progress",
        StopReason::MaxRounds => "stopped: maximum rounds reached",
        StopReason::Cancelled => "cancelled",
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process every PDF in ./papers into ./questions
  pdf2q papers questions

  # Gentler on the API, more patient with failures
  pdf2q -c 2 --max-retries 5 --max-rounds 10 papers questions

  # Re-process documents that already have output
  pdf2q --force papers questions

  # Ask for question type and summary too
  pdf2q --schema detailed --model gpt-4.1 papers questions

OUTPUT LAYOUT:
  questions/<stem>/metadata.json
  questions/<stem>/pages/page-001.png
  questions/<stem>/questions/q001_<id>.png
  questions/<stem>/questions/q001_<id>.raw.png   (only when trimming removed content)
  questions/batch-state.json                     (while documents are failing)

INTERRUPTING:
  Ctrl-C once   stop dispatching new documents, let running ones finish
  Ctrl-C twice  exit immediately (exit code 130)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  RUST_LOG                Override log filter (e.g. pdf2questions=debug)
"#;

/// Extract per-question images from exam-paper PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2q",
    version,
    about = "Extract per-question images from exam-paper PDFs using a vision model",
    long_about = "Render every page of every PDF in a directory, ask a vision model where the \
questions are, and write one cleaned-up image per question. Failed documents are retried \
across rounds and recorded in a batch state file.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the PDFs to process (not searched recursively).
    input_dir: PathBuf,

    /// Directory receiving one output directory per PDF.
    output_dir: PathBuf,

    /// Documents processed concurrently.
    #[arg(short, long, env = "PDF2Q_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Attempts per document per round.
    #[arg(long, env = "PDF2Q_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Maximum number of rounds.
    #[arg(long, env = "PDF2Q_MAX_ROUNDS", default_value_t = 5)]
    max_rounds: u32,

    /// Re-process documents whose output directory already exists.
    #[arg(long, env = "PDF2Q_FORCE")]
    force: bool,

    /// Batch state file. Default: <OUTPUT_DIR>/batch-state.json.
    #[arg(long, env = "PDF2Q_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Vision model ID (e.g. gpt-4.1, gemini-2.5-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Detection response schema.
    #[arg(long, env = "PDF2Q_SCHEMA", value_enum, default_value = "basic")]
    schema: SchemaArg,

    /// Page render scale (0.5–6.0).
    #[arg(long, env = "PDF2Q_RENDER_SCALE", default_value_t = 2.0)]
    render_scale: f32,

    /// Maximum rendered page width or height in pixels.
    #[arg(long, env = "PDF2Q_MAX_PIXELS", default_value_t = 4000)]
    max_pixels: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2Q_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2Q_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max model output tokens per page.
    #[arg(long, env = "PDF2Q_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "PDF2Q_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Detection attempts per page.
    #[arg(long, env = "PDF2Q_DETECT_RETRIES", default_value_t = 3)]
    detect_retries: u32,

    /// Per-page detection call timeout in seconds.
    #[arg(long, env = "PDF2Q_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Containment tolerance for duplicate boxes (0–1000 units).
    #[arg(long, env = "PDF2Q_DEDUP_TOLERANCE", default_value_t = 10)]
    dedup_tolerance: i32,

    /// Padding in pixels around each box before cropping.
    #[arg(long, env = "PDF2Q_CROP_PADDING", default_value_t = 10)]
    crop_padding: u32,

    /// Gap in pixels between a question and its continuation; negative overlaps.
    #[arg(long, env = "PDF2Q_MERGE_GAP", default_value_t = 10, allow_hyphen_values = true)]
    merge_gap: i32,

    /// Margin in pixels added around each finished question.
    #[arg(long, env = "PDF2Q_OUTPUT_PADDING", default_value_t = 20)]
    output_padding: u32,

    /// Skip the final trim-and-pad pass.
    #[arg(long, env = "PDF2Q_NO_TRIM")]
    no_trim: bool,

    /// Keep each question at its natural width.
    #[arg(long, env = "PDF2Q_NO_ALIGN")]
    no_align: bool,

    /// Do not write full page renders.
    #[arg(long, env = "PDF2Q_NO_PAGES")]
    no_pages: bool,

    /// Print the batch outcome as JSON on stdout.
    #[arg(long, env = "PDF2Q_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2Q_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2Q_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2Q_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum SchemaArg {
    Basic,
    Detailed,
}

impl From<SchemaArg> for DetectionSchema {
    fn from(v: SchemaArg) -> Self {
        match v {
            SchemaArg::Basic => DetectionSchema::Basic,
            SchemaArg::Detailed => DetectionSchema::Detailed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build configs and collaborators ──────────────────────────────────
    let extraction = build_extraction_config(&cli).await?;
    let batch = build_batch_config(&cli)?;

    // pdfium must bind before any document is dispatched.
    let renderer = PdfiumRenderer::new(extraction.password.clone(), extraction.max_rendered_pixels);
    renderer
        .check_available()
        .await
        .context("PDF engine unavailable")?;

    let detector = VlmDetector::from_config(&extraction).context("No vision provider available")?;
    let extractor = Extractor::new(
        Arc::new(renderer),
        Arc::new(detector),
        Arc::new(DirectoryArchive),
        extraction,
    );

    let mut runner = BatchRunner::new(Arc::new(extractor), batch);
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        runner = runner.with_progress(cb);
    }

    // ── Interrupt handling ───────────────────────────────────────────────
    // First Ctrl-C: stop dispatching, let in-flight documents finish.
    // Second Ctrl-C: leave immediately.
    let cancel = runner.cancel_flag();
    let quiet = cli.quiet;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if !quiet {
                eprintln!(
                    "\n{} Interrupt received, finishing running documents (Ctrl-C again to abort)",
                    yellow("⚠")
                );
            }
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let outcome = runner.run().await.context("Batch failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "{} rounds: {} completed, {} failed ({})",
            outcome.rounds,
            outcome.completed.len(),
            outcome.failed.len(),
            stop_reason_text(outcome.stop_reason)
        );
        for path in &outcome.failed {
            eprintln!("  failed: {}", path.display());
        }
    }

    if outcome.stop_reason == StopReason::Cancelled {
        std::process::exit(130);
    }
    if !outcome.failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_extraction_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .render_scale(cli.render_scale)
        .max_rendered_pixels(cli.max_pixels)
        .schema(cli.schema.clone().into())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .detect_retries(cli.detect_retries)
        .api_timeout_secs(cli.api_timeout)
        .dedup_tolerance(cli.dedup_tolerance)
        .crop_padding(cli.crop_padding)
        .merge_gap(cli.merge_gap)
        .output_padding(cli.output_padding)
        .trim_and_pad(!cli.no_trim)
        .align_widths(!cli.no_align)
        .keep_page_renders(!cli.no_pages);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }

    builder.build().context("Invalid extraction configuration")
}

/// Map CLI args to `BatchConfig`.
fn build_batch_config(cli: &Cli) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder(&cli.input_dir, &cli.output_dir)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .max_rounds(cli.max_rounds)
        .force(cli.force);
    if let Some(ref path) = cli.state_file {
        builder = builder.state_path(path);
    }
    builder.build().context("Invalid batch configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_library_defaults() {
        let cli = Cli::parse_from(["pdf2q", "in", "out"]);
        let batch = build_batch_config(&cli).unwrap();
        assert_eq!(batch.concurrency, 5);
        assert_eq!(batch.max_retries, 3);
        assert_eq!(batch.max_rounds, 5);
        assert_eq!(batch.state_path, PathBuf::from("out").join("batch-state.json"));
    }

    #[test]
    fn negative_merge_gap_parses() {
        let cli = Cli::parse_from(["pdf2q", "--merge-gap", "-8", "in", "out"]);
        assert_eq!(cli.merge_gap, -8);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let cli = Cli::parse_from(["pdf2q", "-c", "0", "in", "out"]);
        assert!(build_batch_config(&cli).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("ééééé", 3), "ééé\u{2026}");
        assert_eq!(truncate("short", 10), "short");
    }
}
