//! Pixel-level trimming: edge peeling and whitespace trimming.
//!
//! Two trimmers with deliberately different thresholds live here:
//!
//! * [`edge_peel`] removes *ink-bearing* rows and columns from the outer edges
//!   of a crop — scanner bleed, rule lines, the sliver of a neighbouring
//!   question that a loose box picked up. It is capped at 30% of each
//!   dimension so a crop that is ink all the way in is left alone.
//! * [`whitespace_bounds`] finds the tight box around anything that is not
//!   near-white. It never touches ink and has no cap; it is used for final
//!   trim-and-pad cleanup and before stacking continuation fragments.

use image::{imageops, Rgba, RgbaImage};

/// Any RGB channel below this counts as ink for edge peeling.
pub const INK_THRESHOLD: u8 = 200;

/// All RGB channels at or above this count as white for whitespace trimming.
pub const WHITE_THRESHOLD: u8 = 250;

/// Pixels with alpha below this are treated as background.
const OPAQUE_ALPHA: u8 = 128;

/// Maximum share of a dimension that may be peeled from one edge in one pass.
const PEEL_LIMIT: f64 = 0.30;

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// An axis-aligned pixel rectangle, relative to some image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// The rectangle covering the whole image.
    pub fn full(img: &RgbaImage) -> Self {
        Self::new(0, 0, img.width(), img.height())
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }
}

pub fn is_ink(p: &Rgba<u8>) -> bool {
    p[3] >= OPAQUE_ALPHA && p.0[..3].iter().any(|&c| c < INK_THRESHOLD)
}

pub fn is_white(p: &Rgba<u8>) -> bool {
    p[3] < OPAQUE_ALPHA || p.0[..3].iter().all(|&c| c >= WHITE_THRESHOLD)
}

/// Copy `rect` out of `img`.
pub fn crop(img: &RgbaImage, rect: Rect) -> RgbaImage {
    imageops::crop_imm(img, rect.x, rect.y, rect.w, rect.h).to_image()
}

/// A white canvas of the given size.
pub fn white_canvas(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_pixel(w, h, WHITE)
}

// ── Edge peel ────────────────────────────────────────────────────────────

/// Peel artifact borders from every edge of `img`.
///
/// Returns the surviving rectangle relative to `img`. See
/// [`edge_peel_within`] for the exact rules.
pub fn edge_peel(img: &RgbaImage) -> Rect {
    edge_peel_within(img, Rect::full(img))
}

/// Peel artifact borders from the edges of `rect` inside `img`.
///
/// Each pass scans the four edges independently against the rectangle the
/// pass started with: an edge loses rows (or columns) while they contain ink
/// and fewer than 30% of that dimension have been peeled. Peeling stops at the
/// first ink-free line. If the ink is still running when the cap is reached
/// the edge is content, not an artifact, and is left untouched.
///
/// Passes repeat until nothing changes: removing a vertical scan line can
/// turn the rows it crossed into blank rows, which changes what the top and
/// bottom scans see. Stopping at the fixed point makes the operation
/// idempotent.
pub fn edge_peel_within(img: &RgbaImage, rect: Rect) -> Rect {
    let mut rect = rect;
    loop {
        let next = peel_pass(img, rect);
        if next == rect {
            return rect;
        }
        rect = next;
    }
}

fn peel_pass(img: &RgbaImage, r: Rect) -> Rect {
    if r.is_empty() {
        return r;
    }
    let limit_h = (r.h as f64 * PEEL_LIMIT) as u32;
    let limit_w = (r.w as f64 * PEEL_LIMIT) as u32;

    let row_ink = |y: u32| (r.x..r.right()).any(|x| is_ink(img.get_pixel(x, y)));
    let col_ink = |x: u32| (r.y..r.bottom()).any(|y| is_ink(img.get_pixel(x, y)));

    let top = peel_depth(limit_h, |i| row_ink(r.y + i));
    let bottom = peel_depth(limit_h, |i| row_ink(r.bottom() - 1 - i));
    let left = peel_depth(limit_w, |i| col_ink(r.x + i));
    let right = peel_depth(limit_w, |i| col_ink(r.right() - 1 - i));

    Rect::new(
        r.x + left,
        r.y + top,
        r.w - left - right,
        r.h - top - bottom,
    )
}

/// Lines to peel from one edge; `has_ink(i)` inspects the i-th line inward.
fn peel_depth(limit: u32, has_ink: impl Fn(u32) -> bool) -> u32 {
    let mut depth = 0;
    while depth < limit && has_ink(depth) {
        depth += 1;
    }
    // limit < dimension, so line `depth` exists.
    if depth == limit && has_ink(depth) {
        0
    } else {
        depth
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────

/// Tight box around every non-white pixel, or `None` for a blank image.
pub fn whitespace_bounds(img: &RgbaImage) -> Option<Rect> {
    let (w, h) = img.dimensions();
    let blank_row = |y: u32| (0..w).all(|x| is_white(img.get_pixel(x, y)));
    let top = (0..h).find(|&y| !blank_row(y))?;
    let bottom = (0..h).rev().find(|&y| !blank_row(y))?;

    let blank_col = |x: u32| (top..=bottom).all(|y| is_white(img.get_pixel(x, y)));
    let left = (0..w).find(|&x| !blank_col(x))?;
    let right = (0..w).rev().find(|&x| !blank_col(x))?;

    Some(Rect::new(left, top, right - left + 1, bottom - top + 1))
}

/// Strip every fully white border row and column. Blank images are returned
/// unchanged.
pub fn trim_whitespace(img: &RgbaImage) -> RgbaImage {
    match whitespace_bounds(img) {
        Some(rect) if rect != Rect::full(img) => crop(img, rect),
        _ => img.clone(),
    }
}

/// Trim to content, then surround with `padding` white pixels on every side.
pub fn trim_and_pad(img: &RgbaImage, padding: u32) -> RgbaImage {
    let Some(rect) = whitespace_bounds(img) else {
        return img.clone();
    };
    let mut out = white_canvas(rect.w + 2 * padding, rect.h + 2 * padding);
    imageops::replace(&mut out, &crop(img, rect), padding as i64, padding as i64);
    out
}
