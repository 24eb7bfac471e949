//! Error types for the pdf2questions library.
//!
//! Three distinct types reflect three distinct failure modes:
//!
//! * [`Pdf2QError`] — **Fatal for one document**: the document cannot be
//!   processed (bad input file, wrong password, detection exhausted its
//!   retries, output could not be written). The batch scheduler catches it,
//!   retries the document and finally records it in the batch state; it never
//!   terminates the batch run.
//!
//! * [`DetectError`] — **Transient**: a single detection call failed. The
//!   page-level retry loop in [`crate::pipeline::detect`] consumes these and
//!   only escalates to [`Pdf2QError::DetectionFailed`] once retries run out.
//!
//! * [`ExtractionWarning`] — **Non-fatal**: geometry or ordering problems that
//!   lose one detection but leave the document usable. Stored in
//!   [`crate::output::DocumentOutput`] and written to the metadata file.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal per-document errors returned by the pdf2questions library.
#[derive(Debug, Error)]
pub enum Pdf2QError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The input directory could not be listed.
    #[error("Cannot read input directory '{path}': {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The renderer was asked for a page the document does not have.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Detection errors ──────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Detection for one page failed after every retry; the document is aborted.
    #[error("Detection failed for page {page} after {attempts} attempts: {source}")]
    DetectionFailed {
        page: usize,
        attempts: u32,
        #[source]
        source: DetectError,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// A question or page image could not be encoded.
    #[error("Failed to encode '{name}': {detail}")]
    EncodeFailed { name: String, detail: String },

    /// Could not create or write the output archive.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Batch state errors ────────────────────────────────────────────────
    /// The batch state file exists but could not be read or parsed.
    #[error("Batch state file '{path}' is unreadable: {detail}")]
    StateUnreadable { path: PathBuf, detail: String },

    /// The batch state file could not be persisted.
    #[error("Failed to persist batch state to '{path}': {source}")]
    StateWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
pdf2q needs the pdfium shared library to render pages. You can:\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n\
  • Put libpdfium in the current working directory.\n\
  • Install pdfium on the system library path (e.g. /usr/local/lib).\n"
    )]
    PdfiumBindingFailed(String),
}

impl Pdf2QError {
    /// Whether the failure was ultimately caused by a remote rate limit.
    ///
    /// The scheduler uses this to pick the longer backoff base between
    /// document attempts.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Pdf2QError::DetectionFailed { source, .. } if source.is_rate_limited())
    }

    /// Whether another attempt at the same document could succeed.
    ///
    /// Environment and configuration problems fail every attempt the same
    /// way, so the scheduler records them immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Pdf2QError::PdfiumBindingFailed(_)
                | Pdf2QError::ProviderNotConfigured { .. }
                | Pdf2QError::InvalidConfig(_)
        )
    }
}

/// One failed call to the detection service.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum DetectError {
    /// The service signalled HTTP 429 or an equivalent quota error.
    #[error("rate limited: {detail}")]
    RateLimited {
        detail: String,
        retry_after_secs: Option<u64>,
    },

    /// The call did not return within the configured API timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Any other provider or transport error.
    #[error("API error: {0}")]
    Api(String),

    /// The service answered, but not with a decodable detection list.
    #[error("invalid detection response: {0}")]
    InvalidResponse(String),
}

impl DetectError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DetectError::RateLimited { .. })
    }

    /// Classify a provider error message.
    ///
    /// Providers surface quota errors with varying wording; the status code or
    /// one of the usual phrases is enough to pick the rate-limit backoff.
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let retry_after_secs = parse_retry_after(&message);
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("ratelimit")
            || lower.contains("rate_limit")
            || lower.contains("too many requests")
            || lower.contains("resource exhausted")
            || lower.contains("resource_exhausted")
        {
            DetectError::RateLimited {
                detail: message,
                retry_after_secs,
            }
        } else {
            DetectError::Api(message)
        }
    }

    /// The wait the service asked for, if it named one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            DetectError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(secs.saturating_mul(1000)),
            _ => None,
        }
    }
}

static RE_RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:retry[- _]?after|try again in)\D{0,3}(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|secs?|seconds?)?",
    )
    .expect("retry-after regex is valid")
});

/// Seconds to wait from "retry-after: 30" or "Please try again in 1.5s",
/// rounded up.
fn parse_retry_after(message: &str) -> Option<u64> {
    let caps = RE_RETRY_AFTER.captures(message)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let secs = match caps.get(2).map(|m| m.as_str().to_lowercase()) {
        Some(unit) if unit.starts_with("m") => value / 1000.0,
        _ => value,
    };
    Some(secs.ceil() as u64)
}

/// A non-fatal problem found while assembling questions.
///
/// Recorded alongside the output so a reviewer can see which detections were
/// lost without the document as a whole failing.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionWarning {
    /// Every fragment of a detection trimmed down to nothing.
    #[error("Page {page}: detection '{id}' produced no usable fragments")]
    EmptyDetection { page: usize, id: String },

    /// A continuation arrived before any question existed to extend.
    #[error("Page {page}: continuation fragment has no preceding question; dropped")]
    OrphanContinuation { page: usize },
}
