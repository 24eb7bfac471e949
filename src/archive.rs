//! Output containers: a finished [`DocumentOutput`] → named byte buffers →
//! one output per document.
//!
//! ## Layout
//!
//! ```text
//! <output_dir>/<stem>/
//!   metadata.json              — questions, warnings, stats (no pixels)
//!   pages/page-001.png         — full-page renders (optional)
//!   questions/q001_12.png      — one image per question
//!   questions/q001_12.raw.png  — untrimmed view, when trimming removed content
//! ```
//!
//! ## Why write to a temp directory first?
//!
//! The round controller treats "output exists" as "document done". Writing
//! into a sibling temp directory and renaming it into place means a crash
//! mid-write leaves no output directory, so the document is retried next run
//! instead of being skipped with half its images.

use crate::error::Pdf2QError;
use crate::output::{DocumentMetadata, DocumentOutput, QuestionMetadata};
use crate::pipeline::encode::png_bytes;
use async_trait::async_trait;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the metadata entry.
pub const METADATA_FILE: &str = "metadata.json";

/// One named file inside an output container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative path using `/` separators.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Turns named byte buffers into one output container.
#[async_trait]
pub trait ArchiveWriter: Send + Sync {
    /// Write `entries` as the container at `dest`, replacing any existing one.
    async fn write(&self, dest: &Path, entries: Vec<ArchiveEntry>) -> Result<(), Pdf2QError>;
}

/// Reduce a question id to something safe inside a file name.
pub fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "q".to_string()
    } else {
        cleaned.chars().take(48).collect()
    }
}

fn encode(name: String, img: &RgbaImage) -> Result<ArchiveEntry, Pdf2QError> {
    let bytes = png_bytes(img).map_err(|e| Pdf2QError::EncodeFailed {
        name: name.clone(),
        detail: e.to_string(),
    })?;
    Ok(ArchiveEntry { name, bytes })
}

/// Encode every image of `output` and describe them in `metadata.json`.
///
/// The metadata entry comes first; page renders and question images follow
/// in order.
pub fn build_entries(output: &DocumentOutput) -> Result<Vec<ArchiveEntry>, Pdf2QError> {
    let mut entries = Vec::with_capacity(1 + output.pages.len() + 2 * output.questions.len());
    let mut page_names = Vec::with_capacity(output.pages.len());
    let mut questions = Vec::with_capacity(output.questions.len());

    for (i, page) in output.pages.iter().enumerate() {
        let name = format!("pages/page-{:03}.png", i + 1);
        page_names.push(name.clone());
        entries.push(encode(name, page)?);
    }

    for (i, q) in output.questions.iter().enumerate() {
        let index = i + 1;
        let stem = format!("questions/q{:03}_{}", index, sanitize_id(&q.id));

        let image = format!("{stem}.png");
        entries.push(encode(image.clone(), &q.pixels)?);

        let raw_image = match &q.raw_pixels {
            Some(raw) => {
                let name = format!("{stem}.raw.png");
                entries.push(encode(name.clone(), raw)?);
                Some(name)
            }
            None => None,
        };

        questions.push(QuestionMetadata {
            index,
            id: q.id.clone(),
            page_number: q.page_number,
            width: q.pixels.width(),
            height: q.pixels.height(),
            image,
            raw_image,
            details: q.details.clone(),
            continuations: q.continuations,
        });
    }

    let metadata = DocumentMetadata {
        source: output.source.display().to_string(),
        page_count: output.page_count,
        pages: page_names,
        questions,
        warnings: output.warnings.clone(),
        stats: output.stats.clone(),
    };
    let json = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| Pdf2QError::Internal(format!("Failed to serialise metadata: {}", e)))?;
    entries.insert(
        0,
        ArchiveEntry {
            name: METADATA_FILE.to_string(),
            bytes: json,
        },
    );

    Ok(entries)
}

/// [`ArchiveWriter`] producing a plain directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryArchive;

#[async_trait]
impl ArchiveWriter for DirectoryArchive {
    async fn write(&self, dest: &Path, entries: Vec<ArchiveEntry>) -> Result<(), Pdf2QError> {
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || write_directory(&dest, &entries))
            .await
            .map_err(|e| Pdf2QError::Internal(format!("Archive task panicked: {}", e)))?
    }
}

fn write_directory(dest: &Path, entries: &[ArchiveEntry]) -> Result<(), Pdf2QError> {
    let fail = |path: PathBuf| move |source| Pdf2QError::OutputWriteFailed { path, source };

    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(fail(parent.to_path_buf()))?;

    let staging = tempfile::Builder::new()
        .prefix(".pdf2q-")
        .tempdir_in(parent)
        .map_err(fail(parent.to_path_buf()))?;

    for entry in entries {
        let path = staging.path().join(&entry.name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(fail(dir.to_path_buf()))?;
        }
        std::fs::write(&path, &entry.bytes).map_err(fail(path.clone()))?;
    }

    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(fail(dest.to_path_buf()))?;
    }
    std::fs::rename(staging.path(), dest).map_err(fail(dest.to_path_buf()))?;

    debug!("Wrote {} entries to {}", entries.len(), dest.display());
    Ok(())
}
