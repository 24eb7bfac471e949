//! # pdf2questions
//!
//! Cut scanned exam papers into one image per question using a Vision
//! Language Model for layout detection.
//!
//! ## Why this crate?
//!
//! Exam PDFs are usually scans: there is no text layer to search, questions
//! flow across two columns and spill onto the next page, and neighbouring
//! questions sit a few pixels apart. This crate renders each page, asks a VLM
//! for question bounding boxes, and does the fiddly pixel work itself:
//! removing duplicate boxes, peeling slivers of neighbouring content off each
//! crop, stacking multi-column fragments with their indentation intact,
//! stitching page-spanning questions back together and giving every image of
//! a document the same width.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      validate %PDF magic, list a batch directory
//!  ├─ 2. Render     rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Detect     VLM → [{id, boxes}] with retry/backoff
//!  ├─ 4. Dedup      drop boxes contained in another box
//!  ├─ 5. Composite  crop, edge-peel, stack fragments
//!  ├─ 6. Merge      append "continuation" fragments to the previous question
//!  ├─ 7. Align      trim-and-pad, common width
//!  └─ 8. Archive    metadata.json + PNGs, written atomically
//! ```
//!
//! Batches run documents on a bounded worker pool, retry failed documents,
//! repeat rounds while they make progress, and persist their state so an
//! interrupted run can be resumed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2questions::{
//!     BatchConfig, BatchRunner, DirectoryArchive, ExtractionConfig, Extractor, PdfiumRenderer,
//!     VlmDetector,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / GEMINI_API_KEY / ...
//!     let config = ExtractionConfig::default();
//!     let extractor = Extractor::new(
//!         Arc::new(PdfiumRenderer::new(None, config.max_rendered_pixels)),
//!         Arc::new(VlmDetector::from_config(&config)?),
//!         Arc::new(DirectoryArchive),
//!         config,
//!     );
//!
//!     let batch = BatchConfig::builder("papers", "questions").build()?;
//!     let outcome = BatchRunner::new(Arc::new(extractor), batch).run().await?;
//!     eprintln!("{} done, {} failed", outcome.completed.len(), outcome.failed.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2q` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf2questions = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod batch;
pub mod config;
pub mod detection;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use archive::{build_entries, ArchiveEntry, ArchiveWriter, DirectoryArchive};
pub use batch::rounds::{BatchOutcome, BatchRunner, StopReason};
pub use batch::state::{BatchState, FailureRecord, StateStore};
pub use batch::{plan_jobs, BatchJob, CancelFlag, DocumentProcessor, JobSummary};
pub use config::{BatchConfig, BatchConfigBuilder, ExtractionConfig, ExtractionConfigBuilder};
pub use detection::{BoundingBox, Detection, DetectionSchema, QuestionDetails};
pub use error::{DetectError, ExtractionWarning, Pdf2QError};
pub use extract::{extract_document, Extractor};
pub use output::{DocumentMetadata, DocumentOutput, ExtractionStats, QuestionImage};
pub use pipeline::detect::{DetectionService, VlmDetector};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
