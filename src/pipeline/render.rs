//! PDF rasterisation behind the [`PageRenderer`] seam.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, so a document being rendered does
//! not stall the other documents' jobs.
//!
//! ## Why cap pixels as well as scale?
//!
//! Exam papers are usually A4/A3, but the odd poster-sized scan would produce
//! an enormous bitmap at scale 2.0. `max_rendered_pixels` caps either
//! dimension regardless of the scale factor.
//!
//! ## Finding pdfium
//!
//! [`bind_pdfium`] tries `PDFIUM_LIB_PATH`, then the working directory, then
//! the system library path. A failed bind is
//! [`Pdf2QError::PdfiumBindingFailed`], which the scheduler does not retry;
//! the CLI calls [`PdfiumRenderer::check_available`] once before dispatching
//! any document.

use crate::error::Pdf2QError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Turns document pages into raster images.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, pdf: &Path) -> Result<usize, Pdf2QError>;

    /// Render one page (0-indexed) at `scale` × its natural size.
    async fn render_page(
        &self,
        pdf: &Path,
        index: usize,
        scale: f32,
    ) -> Result<DynamicImage, Pdf2QError>;
}

/// [`PageRenderer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    password: Option<String>,
    max_rendered_pixels: u32,
}

impl PdfiumRenderer {
    pub fn new(password: Option<String>, max_rendered_pixels: u32) -> Self {
        Self {
            password,
            max_rendered_pixels,
        }
    }

    /// Bind pdfium once, without opening a document.
    pub async fn check_available(&self) -> Result<(), Pdf2QError> {
        tokio::task::spawn_blocking(|| bind_pdfium().map(|_| ()))
            .await
            .map_err(|e| Pdf2QError::Internal(format!("Pdfium bind task panicked: {}", e)))?
    }
}

/// Environment variable naming an existing pdfium library file.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then `./`, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, Pdf2QError> {
    let bindings = match std::env::var_os(PDFIUM_LIB_PATH_ENV) {
        Some(path) => Pdfium::bind_to_library(PathBuf::from(path)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")),
    }
    .or_else(|_| Pdfium::bind_to_system_library())
    .map_err(binding_failed)?;
    Ok(Pdfium::new(bindings))
}

fn binding_failed(detail: impl std::fmt::Display) -> Pdf2QError {
    Pdf2QError::PdfiumBindingFailed(detail.to_string())
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn page_count(&self, pdf: &Path) -> Result<usize, Pdf2QError> {
        let path = pdf.to_path_buf();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || page_count_blocking(&path, password.as_deref()))
            .await
            .map_err(|e| Pdf2QError::Internal(format!("Page count task panicked: {}", e)))?
    }

    async fn render_page(
        &self,
        pdf: &Path,
        index: usize,
        scale: f32,
    ) -> Result<DynamicImage, Pdf2QError> {
        let path = pdf.to_path_buf();
        let password = self.password.clone();
        let max_pixels = self.max_rendered_pixels;
        tokio::task::spawn_blocking(move || {
            render_page_blocking(&path, password.as_deref(), index, scale, max_pixels)
        })
        .await
        .map_err(|e| Pdf2QError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, Pdf2QError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        let path = PathBuf::from(pdf_path);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                Pdf2QError::WrongPassword { path }
            } else {
                Pdf2QError::PasswordRequired { path }
            }
        } else {
            Pdf2QError::CorruptPdf {
                path,
                detail: err_str,
            }
        }
    })
}

fn page_count_blocking(pdf_path: &Path, password: Option<&str>) -> Result<usize, Pdf2QError> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, pdf_path, password)?;
    Ok(document.pages().len() as usize)
}

fn render_page_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    index: usize,
    scale: f32,
    max_pixels: u32,
) -> Result<DynamicImage, Pdf2QError> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let total = pages.len() as usize;
    if index >= total {
        return Err(Pdf2QError::PageOutOfRange {
            page: index + 1,
            total,
        });
    }

    let page = pages
        .get(index as u16)
        .map_err(|e| Pdf2QError::RasterisationFailed {
            page: index + 1,
            detail: format!("{:?}", e),
        })?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| Pdf2QError::RasterisationFailed {
            page: index + 1,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        index + 1,
        image.width(),
        image.height()
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_failure_is_actionable_and_final() {
        let err = binding_failed("libpdfium.so: cannot open shared object file");
        assert!(matches!(err, Pdf2QError::PdfiumBindingFailed(_)));
        assert!(!err.is_retryable());

        let msg = err.to_string();
        assert!(msg.contains("cannot open shared object file"));
        assert!(msg.contains(PDFIUM_LIB_PATH_ENV));
    }

    #[tokio::test]
    async fn page_count_reports_errors_without_panicking() {
        let renderer = PdfiumRenderer::new(None, 1000);
        let dir = tempfile::tempdir().unwrap();
        // Without pdfium this is a bind failure, with it a load failure.
        let result = renderer.page_count(&dir.path().join("missing.pdf")).await;
        assert!(matches!(
            result,
            Err(Pdf2QError::PdfiumBindingFailed(_)) | Err(Pdf2QError::CorruptPdf { .. })
        ));
    }
}
