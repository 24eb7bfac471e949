//! Pipeline stages for PDF-to-questions extraction.
//!
//! Each submodule implements exactly one transformation step. The geometry
//! stages (`dedup`, `trim`, `composite`, `merge`, `align`) are pure functions
//! over images and boxes; only `render` and `detect` touch the outside world,
//! and both sit behind traits so tests can replace them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ detect ──▶ dedup ──▶ composite ──▶ merge ──▶ align
//! (%PDF)   (pdfium)   (VLM)     (boxes)   (trim+stack) (cont.)  (width)
//! ```
//!
//! 1. [`input`]     — validate a PDF and list a batch's input directory
//! 2. [`render`]    — rasterise pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`detect`]    — ask the detector where the questions are, with
//!    retry/backoff; [`encode`] prepares the image payload
//! 4. [`dedup`]     — drop boxes contained in another box of the same question
//! 5. [`composite`] — cut fragments, peel neighbour slivers ([`trim`]) and
//!    stack them onto one canvas
//! 6. [`merge`]     — append continuation fragments to the previous question
//! 7. [`align`]     — final trim-and-pad and common width per document

pub mod align;
pub mod composite;
pub mod dedup;
pub mod detect;
pub mod encode;
pub mod input;
pub mod merge;
pub mod render;
pub mod trim;
