//! Continuation merging and the per-document question arena.
//!
//! A question whose body runs off the bottom of a page continues at the top
//! of the next one; the detector labels that tail with the continuation id.
//! The tail is stacked under the last question emitted so far. Questions live
//! in a [`QuestionArena`] addressed by [`QuestionIndex`], and a merge replaces
//! the record at that index instead of mutating it through a shared handle.

use crate::output::QuestionImage;
use crate::pipeline::composite::Composite;
use crate::pipeline::trim::{trim_whitespace, white_canvas};
use image::RgbaImage;

/// Stable position of a question within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuestionIndex(pub usize);

/// Owns every question extracted from one document, in emission order.
#[derive(Debug, Default)]
pub struct QuestionArena {
    records: Vec<QuestionImage>,
}

impl QuestionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, question: QuestionImage) -> QuestionIndex {
        self.records.push(question);
        QuestionIndex(self.records.len() - 1)
    }

    pub fn get(&self, index: QuestionIndex) -> Option<&QuestionImage> {
        self.records.get(index.0)
    }

    /// The most recently emitted question, if any.
    pub fn last_index(&self) -> Option<QuestionIndex> {
        self.records.len().checked_sub(1).map(QuestionIndex)
    }

    /// Swap in a new record, returning the old one.
    pub fn replace(
        &mut self,
        index: QuestionIndex,
        question: QuestionImage,
    ) -> Option<QuestionImage> {
        self.records
            .get_mut(index.0)
            .map(|slot| std::mem::replace(slot, question))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_vec(self) -> Vec<QuestionImage> {
        self.records
    }
}

/// Trim both images to content and stack `bottom` under `top`, left-aligned.
///
/// `gap` may be negative; the images then overlap by that many rows and the
/// overlap keeps the darker value of each channel, so neither side loses ink.
pub fn stack_vertical(top: &RgbaImage, bottom: &RgbaImage, gap: i32) -> RgbaImage {
    let top = trim_whitespace(top);
    let bottom = trim_whitespace(bottom);

    let bottom_y = (top.height() as i64 + gap as i64).max(0) as u32;
    let width = top.width().max(bottom.width());
    let height = top.height().max(bottom_y + bottom.height());

    let mut out = white_canvas(width, height);
    darken_onto(&mut out, &top, 0);
    darken_onto(&mut out, &bottom, bottom_y);
    out
}

fn darken_onto(canvas: &mut RgbaImage, img: &RgbaImage, y0: u32) {
    for (x, y, p) in img.enumerate_pixels() {
        let dst = canvas.get_pixel_mut(x, y0 + y);
        for c in 0..3 {
            dst[c] = dst[c].min(p[c]);
        }
        dst[3] = dst[3].max(p[3]);
    }
}

/// Merge a continuation composite into the question at `index`.
///
/// Returns `false` (and changes nothing) when `index` is not in the arena.
pub fn merge_continuation(
    arena: &mut QuestionArena,
    index: QuestionIndex,
    continuation: &Composite,
    gap: i32,
) -> bool {
    let Some(prev) = arena.get(index) else {
        return false;
    };

    let pixels = stack_vertical(&prev.pixels, &continuation.image, gap);
    let raw_pixels = match (&prev.raw_pixels, &continuation.raw) {
        (None, None) => None,
        (prev_raw, cont_raw) => Some(stack_vertical(
            prev_raw.as_ref().unwrap_or(&prev.pixels),
            cont_raw.as_ref().unwrap_or(&continuation.image),
            gap,
        )),
    };

    let merged = QuestionImage {
        pixels,
        raw_pixels,
        continuations: prev.continuations + 1,
        ..prev.clone()
    };
    arena.replace(index, merged);
    true
}
