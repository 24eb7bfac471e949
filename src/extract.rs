//! Per-document extraction: render → detect → composite → merge → align.
//!
//! [`extract_document`] is the single-document entry point. It returns a
//! [`DocumentOutput`] in memory and writes nothing; [`Extractor`] wires it to
//! an [`ArchiveWriter`] so the batch scheduler can run it as a
//! [`DocumentProcessor`].
//!
//! Pages are processed strictly in order: a continuation on page N can only
//! be merged if every question up to page N−1 is already in the arena.

use crate::archive::{build_entries, ArchiveWriter};
use crate::batch::{BatchJob, DocumentProcessor, JobSummary};
use crate::config::ExtractionConfig;
use crate::detection::Detection;
use crate::error::{ExtractionWarning, Pdf2QError};
use crate::output::{DocumentOutput, ExtractionStats, QuestionImage};
use crate::pipeline::align::{align_widths, trim_and_pad_all};
use crate::pipeline::composite::composite;
use crate::pipeline::dedup::dedup_boxes;
use crate::pipeline::detect::{detect_with_retry, DetectionService};
use crate::pipeline::input::validate_pdf;
use crate::pipeline::merge::{merge_continuation, QuestionArena};
use crate::pipeline::render::PageRenderer;
use async_trait::async_trait;
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract every question of one PDF.
///
/// ## Errors
/// Input validation, rendering and exhausted detection retries are fatal
/// for the document. Geometry problems become [`ExtractionWarning`]s.
pub async fn extract_document(
    path: &Path,
    renderer: &dyn PageRenderer,
    detector: &dyn DetectionService,
    config: &ExtractionConfig,
) -> Result<DocumentOutput, Pdf2QError> {
    let total_start = Instant::now();

    // ── Step 1: Validate input ───────────────────────────────────────────
    validate_pdf(path)?;

    // ── Step 2: Count pages ──────────────────────────────────────────────
    let page_count = renderer.page_count(path).await?;
    info!("{}: {} pages", path.display(), page_count);

    let mut arena = QuestionArena::new();
    let mut warnings = Vec::new();
    let mut stats = ExtractionStats {
        total_pages: page_count,
        ..Default::default()
    };
    let mut pages = Vec::new();

    // ── Step 3: Pages, strictly in order ─────────────────────────────────
    for index in 0..page_count {
        let page_num = index + 1;

        let render_start = Instant::now();
        let rendered = renderer.render_page(path, index, config.render_scale).await?;
        stats.render_duration_ms += render_start.elapsed().as_millis() as u64;

        let detect_start = Instant::now();
        let detections = detect_with_retry(detector, &rendered, page_num, config).await?;
        stats.detect_duration_ms += detect_start.elapsed().as_millis() as u64;

        let page = rendered.to_rgba8();
        process_page_detections(
            &mut arena,
            &mut warnings,
            &mut stats,
            page_num,
            &page,
            &detections,
            config,
        );

        if config.keep_page_renders {
            pages.push(page);
        }
    }

    // ── Step 4: Normalise the finished set ───────────────────────────────
    let mut questions = arena.into_vec();
    if config.trim_and_pad {
        trim_and_pad_all(&mut questions, config.output_padding);
    }
    if config.align_widths {
        align_widths(&mut questions);
    }

    stats.questions = questions.len();
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "{}: {} questions, {} continuations merged, {} warnings in {}ms",
        path.display(),
        stats.questions,
        stats.continuations_merged,
        warnings.len(),
        stats.total_duration_ms
    );

    Ok(DocumentOutput {
        source: path.to_path_buf(),
        page_count,
        pages,
        questions,
        warnings,
        stats,
    })
}

/// Turn one page's detections into questions in `arena`.
///
/// Detections are handled in the order the detector returned them. A
/// continuation is merged into the most recently emitted question; if none
/// exists yet it is dropped with [`ExtractionWarning::OrphanContinuation`].
pub fn process_page_detections(
    arena: &mut QuestionArena,
    warnings: &mut Vec<ExtractionWarning>,
    stats: &mut ExtractionStats,
    page_num: usize,
    page: &RgbaImage,
    detections: &[Detection],
    config: &ExtractionConfig,
) {
    let settings = config.compositor_settings();
    stats.detections += detections.len();

    for detection in detections {
        let boxes = dedup_boxes(detection.boxes(), config.dedup_tolerance);
        let Some(composed) = composite(page, &boxes, &settings) else {
            warn!(
                "Page {}: detection '{}' produced no usable fragments",
                page_num,
                detection.id()
            );
            warnings.push(ExtractionWarning::EmptyDetection {
                page: page_num,
                id: detection.id().to_string(),
            });
            stats.dropped_detections += 1;
            continue;
        };

        if detection.is_continuation() {
            let merged = arena
                .last_index()
                .is_some_and(|idx| merge_continuation(arena, idx, &composed, config.merge_gap));
            if merged {
                debug!("Page {}: merged continuation", page_num);
                stats.continuations_merged += 1;
            } else {
                warn!("Page {}: continuation with no preceding question; dropped", page_num);
                warnings.push(ExtractionWarning::OrphanContinuation { page: page_num });
                stats.dropped_detections += 1;
            }
            continue;
        }

        arena.push(QuestionImage {
            id: detection.id().trim().to_string(),
            page_number: page_num,
            pixels: composed.image,
            raw_pixels: composed.raw,
            details: detection.details(),
            continuations: 0,
        });
    }
}

/// Extraction plus archive output, as one batch job.
pub struct Extractor {
    renderer: Arc<dyn PageRenderer>,
    detector: Arc<dyn DetectionService>,
    archive: Arc<dyn ArchiveWriter>,
    config: ExtractionConfig,
}

impl Extractor {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        detector: Arc<dyn DetectionService>,
        archive: Arc<dyn ArchiveWriter>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            renderer,
            detector,
            archive,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentProcessor for Extractor {
    async fn process(&self, job: &BatchJob) -> Result<JobSummary, Pdf2QError> {
        let output = extract_document(
            &job.source,
            self.renderer.as_ref(),
            self.detector.as_ref(),
            &self.config,
        )
        .await?;

        let entries = build_entries(&output)?;
        self.archive.write(&job.output, entries).await?;

        Ok(JobSummary {
            pages: output.page_count,
            questions: output.questions.len(),
            warnings: output.warnings.len(),
        })
    }
}
