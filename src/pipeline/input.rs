//! Input resolution: validate a PDF path and list a batch's input directory.
//!
//! pdfium reports a non-PDF file as a generic parse failure, so the magic
//! bytes (`%PDF`) are checked up front and callers get a meaningful error.

use crate::error::Pdf2QError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn validate_pdf(path: &Path) -> Result<(), Pdf2QError> {
    let path_buf = path.to_path_buf();
    if !path.exists() {
        return Err(Pdf2QError::FileNotFound { path: path_buf });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(Pdf2QError::NotAPdf {
                    path: path_buf,
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2QError::PermissionDenied { path: path_buf });
        }
        Err(_) => {
            return Err(Pdf2QError::FileNotFound { path: path_buf });
        }
    }

    debug!("Validated PDF: {}", path.display());
    Ok(())
}

/// Whether `path` has a `.pdf` extension, in any case.
pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// List the `.pdf` files directly inside `dir`, sorted by path.
///
/// Subdirectories are not descended into. Sorting keeps dispatch order (and
/// therefore logs and state files) stable between runs.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, Pdf2QError> {
    let unreadable = |source| Pdf2QError::InputDirUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut pdfs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        if path.is_file() && has_pdf_extension(&path) {
            pdfs.push(path);
        }
    }
    pdfs.sort();
    debug!("Found {} PDFs in {}", pdfs.len(), dir.display());
    Ok(pdfs)
}
