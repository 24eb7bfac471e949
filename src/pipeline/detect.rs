//! Question detection: page image → list of [`Detection`] records.
//!
//! The [`DetectionService`] trait is the seam between the geometry pipeline
//! and whatever answers "where are the questions on this page?". The shipped
//! implementation, [`VlmDetector`], asks a vision model through
//! `edgequake-llm`; tests substitute scripted detectors.
//!
//! ## Retry Strategy
//!
//! Detection calls fail transiently under concurrent load (HTTP 429 / 503,
//! timeouts, the odd malformed answer). [`detect_with_retry`] retries each
//! page with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`), and
//! switches to the longer `rate_limit_backoff_ms` base when the service said
//! it was rate limiting us. A wait the service names ("retry-after: 30",
//! "try again in 1.5s") is never undercut. Only after every attempt fails does the page
//! escalate to [`Pdf2QError::DetectionFailed`], which aborts the document.

use crate::config::ExtractionConfig;
use crate::detection::Detection;
use crate::error::{DetectError, Pdf2QError};
use crate::pipeline::encode;
use crate::prompts::{detection_prompt, USER_INSTRUCTION};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Finds the questions on one rendered page.
#[async_trait]
pub trait DetectionService: Send + Sync {
    /// Detect questions on `page`. `page_num` is 1-indexed and only used for
    /// logging.
    async fn detect(
        &self,
        page: &DynamicImage,
        page_num: usize,
    ) -> Result<Vec<Detection>, DetectError>;
}

/// [`DetectionService`] backed by a vision-language model.
pub struct VlmDetector {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    api_timeout_secs: u64,
}

impl std::fmt::Debug for VlmDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VlmDetector")
            .field("provider", &"<dyn LLMProvider>")
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl VlmDetector {
    /// Wrap an already-resolved provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| detection_prompt(config.schema));
        Self {
            provider,
            system_prompt,
            options: build_options(config),
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider from the config (or the environment) and wrap it.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, Pdf2QError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl DetectionService for VlmDetector {
    async fn detect(
        &self,
        page: &DynamicImage,
        page_num: usize,
    ) -> Result<Vec<Detection>, DetectError> {
        let image_data = encode::encode_page(page)
            .map_err(|e| DetectError::Api(format!("Image encoding failed: {}", e)))?;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(USER_INSTRUCTION, vec![image_data]),
        ];

        let start = Instant::now();
        let call = self.provider.chat(&messages, Some(&self.options));
        let response = match timeout(Duration::from_secs(self.api_timeout_secs), call).await {
            Err(_) => {
                return Err(DetectError::Timeout {
                    secs: self.api_timeout_secs,
                })
            }
            Ok(Err(e)) => return Err(DetectError::from_provider_message(e.to_string())),
            Ok(Ok(response)) => response,
        };

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page_num,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        parse_detections(&response.content)
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Pdf2QError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2QError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, Pdf2QError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2QError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Detect one page, retrying transient failures.
///
/// `config.detect_retries` is the total number of attempts.
pub async fn detect_with_retry(
    detector: &dyn DetectionService,
    page: &DynamicImage,
    page_num: usize,
    config: &ExtractionConfig,
) -> Result<Vec<Detection>, Pdf2QError> {
    let attempts = config.detect_retries.max(1);
    let mut last_err: Option<DetectError> = None;

    for attempt in 0..attempts {
        if let Some(ref err) = last_err {
            let backoff = retry_delay_ms(err, attempt, config);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num,
                attempt,
                attempts - 1,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match detector.detect(page, page_num).await {
            Ok(detections) => {
                debug!("Page {}: {} detections", page_num, detections.len());
                return Ok(detections);
            }
            Err(e) => {
                warn!("Page {}: attempt {} failed — {}", page_num, attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    Err(Pdf2QError::DetectionFailed {
        page: page_num,
        attempts,
        source: last_err.unwrap_or_else(|| DetectError::Api("Unknown error".into())),
    })
}

/// Delay before attempt `attempt + 1`, after `attempt` failures.
///
/// Exponential on the plain or rate-limit base; a wait named by the service
/// is honoured as a floor.
fn retry_delay_ms(err: &DetectError, attempt: u32, config: &ExtractionConfig) -> u64 {
    let base = if err.is_rate_limited() {
        config.rate_limit_backoff_ms
    } else {
        config.retry_backoff_ms
    };
    let backoff = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    backoff.max(err.retry_after_ms().unwrap_or(0))
}

// ── Response parsing ─────────────────────────────────────────────────────

static RE_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[a-zA-Z]*\s*\n?(.*?)\n?```\s*$").expect("fence regex is valid")
});

/// Strip a surrounding ```` ``` ```` / ```` ```json ```` fence, if any.
fn strip_fences(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_FENCES.captures(trimmed).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => trimmed,
    }
}

/// Cut the outermost JSON array or object out of surrounding prose.
fn json_span(input: &str) -> &str {
    let start = input.find(['[', '{']);
    let end = input.rfind([']', '}']);
    match (start, end) {
        (Some(s), Some(e)) if s < e => &input[s..=e],
        _ => input,
    }
}

/// Decode a raw detector answer into detection records.
///
/// Accepts a bare JSON array or an object with a `questions` array, with or
/// without markdown fences. Numeric ids are read as strings. Records that do
/// not decode are skipped; an answer that is not a list at all is an
/// [`DetectError::InvalidResponse`].
pub fn parse_detections(raw: &str) -> Result<Vec<Detection>, DetectError> {
    let body = json_span(strip_fences(raw));
    let value: Value = serde_json::from_str(body)
        .map_err(|e| DetectError::InvalidResponse(format!("{e}: {}", preview(raw))))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("questions") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(DetectError::InvalidResponse(format!(
                    "object without a 'questions' array: {}",
                    preview(raw)
                )))
            }
        },
        other => {
            return Err(DetectError::InvalidResponse(format!(
                "expected a JSON array, got {}",
                preview(&other.to_string())
            )))
        }
    };

    let mut detections = Vec::with_capacity(items.len());
    for mut item in items {
        if let Some(Value::Number(n)) = item.get("id") {
            let id = n.to_string();
            item["id"] = Value::String(id);
        }
        match serde_json::from_value::<Detection>(item) {
            Ok(d) => detections.push(d),
            Err(e) => warn!("Skipping undecodable detection record: {}", e),
        }
    }
    Ok(detections)
}

fn preview(s: &str) -> String {
    let s = s.trim();
    match s.char_indices().nth(120) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}
