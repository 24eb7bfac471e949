//! Output types produced by the per-document pipeline.

use crate::detection::QuestionDetails;
use crate::error::ExtractionWarning;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One extracted question.
///
/// Created when a non-continuation detection is first composited; replaced
/// whole when a continuation is merged into it; frozen once the document is
/// finished.
#[derive(Debug, Clone)]
pub struct QuestionImage {
    pub id: String,
    /// 1-indexed page on which the question starts.
    pub page_number: usize,
    pub pixels: RgbaImage,
    /// Untrimmed comparison view; only present when trimming removed content.
    pub raw_pixels: Option<RgbaImage>,
    /// Extra fields when the detector ran with the detailed schema.
    pub details: Option<QuestionDetails>,
    /// Number of continuation fragments merged into this question.
    pub continuations: usize,
}

/// Everything extracted from one document.
#[derive(Debug, Clone)]
pub struct DocumentOutput {
    pub source: PathBuf,
    pub page_count: usize,
    /// Full-page renders, in page order. Empty unless page renders are kept.
    pub pages: Vec<RgbaImage>,
    pub questions: Vec<QuestionImage>,
    pub warnings: Vec<ExtractionWarning>,
    pub stats: ExtractionStats,
}

/// Per-document counters and timings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    /// Detections returned by the detector across all pages.
    pub detections: usize,
    pub questions: usize,
    pub continuations_merged: usize,
    /// Detections that produced no output (empty or orphaned).
    pub dropped_detections: usize,
    pub render_duration_ms: u64,
    pub detect_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Metadata file written next to the images. Contains no pixel data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub page_count: usize,
    pub pages: Vec<String>,
    pub questions: Vec<QuestionMetadata>,
    pub warnings: Vec<ExtractionWarning>,
    pub stats: ExtractionStats,
}

/// Metadata for one question image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionMetadata {
    pub index: usize,
    pub id: String,
    pub page_number: usize,
    pub width: u32,
    pub height: u32,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<QuestionDetails>,
    pub continuations: usize,
}
