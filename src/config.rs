//! Configuration types for question extraction and batch runs.
//!
//! Two structs, two scopes:
//!
//! * [`ExtractionConfig`] — everything that shapes how *one* document is
//!   turned into question images: rendering, the detection call, geometry and
//!   output normalisation.
//! * [`BatchConfig`] — everything about *many* documents: where they live,
//!   how many run at once, how often each is retried and how many rounds the
//!   controller may run.
//!
//! Both are built through builders whose setters clamp obviously-bad input
//! and whose `build()` rejects what cannot be clamped.

use crate::detection::DetectionSchema;
use crate::error::Pdf2QError;
use crate::pipeline::composite::CompositorSettings;
use crate::pipeline::dedup::DEFAULT_TOLERANCE;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the batch state file inside the output directory.
pub const DEFAULT_STATE_FILE: &str = "batch-state.json";

/// Configuration for extracting the questions of one document.
///
/// # Example
/// ```rust
/// use pdf2questions::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .render_scale(3.0)
///     .model("gpt-4.1")
///     .merge_gap(0)
///     .build()
///     .unwrap();
/// assert_eq!(config.merge_gap, 0);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Page render scale relative to the PDF's natural size. Range: 0.5–6.0. Default: 2.0.
    ///
    /// Box coordinates are normalised, so scale only affects how crisp the
    /// question images are and how much detail the detector sees.
    pub render_scale: f32,

    /// Maximum rendered width or height in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Vision model identifier, e.g. "gpt-4.1", "gemini-2.5-flash".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "ollama").
    /// If None along with `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for detection. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Response schema requested from the detector. Default: [`DetectionSchema::Basic`].
    pub schema: DetectionSchema,

    /// Custom system prompt. If None, uses the built-in prompt for `schema`.
    pub system_prompt: Option<String>,

    /// Attempts per page before detection is declared failed. Default: 3.
    pub detect_retries: u32,

    /// Base delay between detection attempts, doubled each time. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Base delay used instead when the service rate-limited us. Default: 5000.
    pub rate_limit_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Containment slack (normalised units) for duplicate boxes. Default: 10.
    pub dedup_tolerance: i32,

    /// Pixels added around every box before cropping. Default: 10.
    pub crop_padding: u32,

    /// Canvas margin left of the leftmost fragment. Default: 20.
    pub left_pad: u32,

    /// Canvas margin right of the widest fragment. Default: 20.
    pub right_pad: u32,

    /// Canvas margin above the first and below the last fragment. Default: 20.
    pub vertical_pad: u32,

    /// Vertical gap between stacked fragments. Default: 10.
    pub fragment_gap: u32,

    /// Gap between a question and its continuation; negative overlaps. Default: 10.
    pub merge_gap: i32,

    /// Re-trim each finished question and pad it uniformly. Default: true.
    pub trim_and_pad: bool,

    /// Margin used by `trim_and_pad`. Default: 20.
    pub output_padding: u32,

    /// Pad every question of a document to the same width. Default: true.
    pub align_widths: bool,

    /// Write full page renders alongside the questions. Default: true.
    pub keep_page_renders: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            render_scale: 2.0,
            max_rendered_pixels: 4000,
            password: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            schema: DetectionSchema::default(),
            system_prompt: None,
            detect_retries: 3,
            retry_backoff_ms: 1000,
            rate_limit_backoff_ms: 5000,
            api_timeout_secs: 120,
            dedup_tolerance: DEFAULT_TOLERANCE,
            crop_padding: 10,
            left_pad: 20,
            right_pad: 20,
            vertical_pad: 20,
            fragment_gap: 10,
            merge_gap: 10,
            trim_and_pad: true,
            output_padding: 20,
            align_widths: true,
            keep_page_renders: true,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("render_scale", &self.render_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("schema", &self.schema)
            .field("detect_retries", &self.detect_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("dedup_tolerance", &self.dedup_tolerance)
            .field("merge_gap", &self.merge_gap)
            .field("trim_and_pad", &self.trim_and_pad)
            .field("align_widths", &self.align_widths)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Geometry knobs consumed by the fragment compositor.
    pub fn compositor_settings(&self) -> CompositorSettings {
        CompositorSettings {
            crop_padding: self.crop_padding,
            left_pad: self.left_pad,
            right_pad: self.right_pad,
            vertical_pad: self.vertical_pad,
            fragment_gap: self.fragment_gap,
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 6.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn schema(mut self, schema: DetectionSchema) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn detect_retries(mut self, n: u32) -> Self {
        self.config.detect_retries = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn rate_limit_backoff_ms(mut self, ms: u64) -> Self {
        self.config.rate_limit_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn dedup_tolerance(mut self, tol: i32) -> Self {
        self.config.dedup_tolerance = tol.max(0);
        self
    }

    pub fn crop_padding(mut self, px: u32) -> Self {
        self.config.crop_padding = px;
        self
    }

    pub fn left_pad(mut self, px: u32) -> Self {
        self.config.left_pad = px;
        self
    }

    pub fn right_pad(mut self, px: u32) -> Self {
        self.config.right_pad = px;
        self
    }

    pub fn vertical_pad(mut self, px: u32) -> Self {
        self.config.vertical_pad = px;
        self
    }

    pub fn fragment_gap(mut self, px: u32) -> Self {
        self.config.fragment_gap = px;
        self
    }

    pub fn merge_gap(mut self, px: i32) -> Self {
        self.config.merge_gap = px;
        self
    }

    pub fn trim_and_pad(mut self, v: bool) -> Self {
        self.config.trim_and_pad = v;
        self
    }

    pub fn output_padding(mut self, px: u32) -> Self {
        self.config.output_padding = px;
        self
    }

    pub fn align_widths(mut self, v: bool) -> Self {
        self.config.align_widths = v;
        self
    }

    pub fn keep_page_renders(mut self, v: bool) -> Self {
        self.config.keep_page_renders = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Pdf2QError> {
        let c = &self.config;
        if !(0.5..=6.0).contains(&c.render_scale) {
            return Err(Pdf2QError::InvalidConfig(format!(
                "Render scale must be 0.5–6.0, got {}",
                c.render_scale
            )));
        }
        if c.detect_retries == 0 {
            return Err(Pdf2QError::InvalidConfig(
                "Detection retries must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(Pdf2QError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Batch ────────────────────────────────────────────────────────────────

/// Configuration for a multi-document batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory scanned (non-recursively) for `.pdf` files.
    pub input_dir: PathBuf,

    /// Directory receiving one output directory per document.
    pub output_dir: PathBuf,

    /// Persistent batch state. Default: `<output_dir>/batch-state.json`.
    pub state_path: PathBuf,

    /// Maximum documents processed at once. Default: 5.
    ///
    /// Each document holds one detection call in flight at a time, so this is
    /// also the bound on concurrent API calls.
    pub concurrency: usize,

    /// Attempts per document per round. Default: 3.
    pub max_retries: u32,

    /// Rounds the controller may run before giving up. Default: 5.
    pub max_rounds: u32,

    /// Re-process documents that already have output. Default: false.
    pub force: bool,

    /// Base delay between document attempts, doubled each time. Default: 1000.
    pub job_backoff_ms: u64,

    /// Base delay used instead when the failure was a rate limit. Default: 5000.
    pub rate_limit_backoff_ms: u64,
}

impl BatchConfig {
    /// Start a builder for the given input and output directories.
    pub fn builder(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> BatchConfigBuilder {
        let input_dir = input_dir.into();
        let output_dir = output_dir.into();
        let state_path = output_dir.join(DEFAULT_STATE_FILE);
        BatchConfigBuilder {
            config: BatchConfig {
                input_dir,
                output_dir,
                state_path,
                concurrency: 5,
                max_retries: 3,
                max_rounds: 5,
                force: false,
                job_backoff_ms: 1000,
                rate_limit_backoff_ms: 5000,
            },
        }
    }

    /// Delay before attempt `attempt + 1` of a job, after `attempt` failures.
    pub fn job_backoff(&self, attempt: u32, rate_limited: bool) -> u64 {
        let base = if rate_limited {
            self.rate_limit_backoff_ms
        } else {
            self.job_backoff_ms
        };
        base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state_path = path.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn max_rounds(mut self, n: u32) -> Self {
        self.config.max_rounds = n;
        self
    }

    pub fn force(mut self, v: bool) -> Self {
        self.config.force = v;
        self
    }

    pub fn job_backoff_ms(mut self, ms: u64) -> Self {
        self.config.job_backoff_ms = ms;
        self
    }

    pub fn rate_limit_backoff_ms(mut self, ms: u64) -> Self {
        self.config.rate_limit_backoff_ms = ms;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, Pdf2QError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(Pdf2QError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_retries == 0 {
            return Err(Pdf2QError::InvalidConfig(
                "Max retries must be ≥ 1".into(),
            ));
        }
        if c.max_rounds == 0 {
            return Err(Pdf2QError::InvalidConfig(
                "Max rounds must be ≥ 1".into(),
            ));
        }
        if c.input_dir == c.output_dir {
            return Err(Pdf2QError::InvalidConfig(
                "Input and output directories must differ".into(),
            ));
        }
        Ok(self.config)
    }
}
