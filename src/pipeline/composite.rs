//! Fragment compositing: one detection's boxes → one question image.
//!
//! A question that flows across columns (or is split by the detector into
//! several boxes) arrives as several boxes in reading order. Each box is cut
//! out of the page with some padding, edge-peeled, and the fragments are
//! stacked top to bottom on a white canvas.
//!
//! ## Indentation
//!
//! Fragments are not simply left-aligned. Every fragment remembers where its
//! ink starts in *page* coordinates (`absolute_ink_x`); the smallest of those
//! becomes the shared left anchor and each fragment is shifted right by its
//! distance from that anchor. A continuation of a sub-question that was
//! indented in the second column therefore stays indented in the output.
//!
//! ```text
//! width  = max(ink_x − min_ink_x + trim_w) + left_pad + right_pad
//! height = Σ trim_h + gap × (n − 1) + 2 × vertical_pad
//! ```

use crate::detection::{BoundingBox, NORMALIZED_EXTENT};
use crate::pipeline::trim::{crop, edge_peel, white_canvas, Rect};
use image::{imageops, RgbaImage};
use tracing::debug;

/// Geometry knobs for cutting and compositing fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorSettings {
    /// Pixels added around each detected box before cropping.
    pub crop_padding: u32,
    pub left_pad: u32,
    pub right_pad: u32,
    /// Applied at both the top and the bottom of the canvas.
    pub vertical_pad: u32,
    /// Vertical space between stacked fragments.
    pub fragment_gap: u32,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            crop_padding: 10,
            left_pad: 20,
            right_pad: 20,
            vertical_pad: 20,
            fragment_gap: 10,
        }
    }
}

/// One cropped and edge-peeled box.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// The untrimmed crop.
    pub crop: RgbaImage,
    /// Trim rectangle relative to `crop`.
    pub trim: Rect,
    /// Left edge of the content in page pixel coordinates.
    pub absolute_ink_x: u32,
}

impl Fragment {
    /// Wrap a crop whose left edge sat at `crop_x` on the page, computing the
    /// trim with [`edge_peel`].
    pub fn from_crop(crop: RgbaImage, crop_x: u32) -> Self {
        let trim = edge_peel(&crop);
        Self::new(crop, crop_x, trim)
    }

    pub fn new(crop: RgbaImage, crop_x: u32, trim: Rect) -> Self {
        Self {
            crop,
            trim,
            absolute_ink_x: crop_x + trim.x,
        }
    }

    pub fn trimmed(&self) -> RgbaImage {
        crop(&self.crop, self.trim)
    }

    pub fn was_trimmed(&self) -> bool {
        self.trim != Rect::full(&self.crop)
    }

    pub fn is_degenerate(&self) -> bool {
        self.trim.is_empty()
    }
}

/// Convert a normalized box to a padded pixel rectangle clamped to the page.
pub fn box_to_pixels(b: &BoundingBox, page_w: u32, page_h: u32, padding: u32) -> Rect {
    let scale = |v: i32, extent: u32| v as f64 * extent as f64 / NORMALIZED_EXTENT as f64;
    let pad = padding as i64;
    let lo = |v: i32, extent: u32| (scale(v, extent).floor() as i64 - pad).clamp(0, extent as i64);
    let hi = |v: i32, extent: u32| (scale(v, extent).ceil() as i64 + pad).clamp(0, extent as i64);

    let (x0, x1) = (lo(b.xmin, page_w), hi(b.xmax, page_w));
    let (y0, y1) = (lo(b.ymin, page_h), hi(b.ymax, page_h));
    Rect::new(
        x0 as u32,
        y0 as u32,
        (x1 - x0).max(0) as u32,
        (y1 - y0).max(0) as u32,
    )
}

/// Crop and peel every box, dropping fragments that trim to nothing.
pub fn cut_fragments(
    page: &RgbaImage,
    boxes: &[BoundingBox],
    settings: &CompositorSettings,
) -> Vec<Fragment> {
    let (page_w, page_h) = page.dimensions();
    boxes
        .iter()
        .filter_map(|b| {
            let region = box_to_pixels(b, page_w, page_h, settings.crop_padding);
            if region.is_empty() {
                debug!("Box {:?} maps to an empty region; skipped", b);
                return None;
            }
            let fragment = Fragment::from_crop(crop(page, region), region.x);
            if fragment.is_degenerate() {
                debug!("Box {:?} trimmed to nothing; skipped", b);
                return None;
            }
            Some(fragment)
        })
        .collect()
}

/// Where a fragment lands on the composite canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
}

/// Canvas size and fragment positions for one composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub min_ink_x: u32,
    pub placements: Vec<Placement>,
}

/// Lay out non-degenerate fragments. Returns `None` for an empty slice.
pub fn layout(fragments: &[Fragment], settings: &CompositorSettings) -> Option<Layout> {
    let min_ink_x = fragments.iter().map(|f| f.absolute_ink_x).min()?;

    let content_w = fragments
        .iter()
        .map(|f| f.absolute_ink_x - min_ink_x + f.trim.w)
        .max()
        .unwrap_or(0);
    let width = content_w + settings.left_pad + settings.right_pad;

    let mut y = settings.vertical_pad;
    let mut placements = Vec::with_capacity(fragments.len());
    for (i, f) in fragments.iter().enumerate() {
        if i > 0 {
            y += settings.fragment_gap;
        }
        placements.push(Placement {
            x: settings.left_pad + (f.absolute_ink_x - min_ink_x),
            y,
        });
        y += f.trim.h;
    }
    let height = y + settings.vertical_pad;

    Some(Layout {
        width,
        height,
        min_ink_x,
        placements,
    })
}

/// The composited question plus its untrimmed comparison view.
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbaImage,
    /// Present only when at least one fragment was shortened by trimming.
    pub raw: Option<RgbaImage>,
    pub layout: Layout,
}

/// Composite one detection's boxes cut from `page`.
///
/// Returns `None` when every fragment is degenerate; the caller records a
/// warning.
pub fn composite(
    page: &RgbaImage,
    boxes: &[BoundingBox],
    settings: &CompositorSettings,
) -> Option<Composite> {
    composite_fragments(cut_fragments(page, boxes, settings), settings)
}

/// Composite already-cut fragments, in the order given.
pub fn composite_fragments(
    mut fragments: Vec<Fragment>,
    settings: &CompositorSettings,
) -> Option<Composite> {
    fragments.retain(|f| !f.is_degenerate());
    let layout = layout(&fragments, settings)?;

    let mut image = white_canvas(layout.width, layout.height);
    for (f, at) in fragments.iter().zip(&layout.placements) {
        imageops::replace(&mut image, &f.trimmed(), at.x as i64, at.y as i64);
    }

    let raw = fragments
        .iter()
        .any(Fragment::was_trimmed)
        .then(|| render_untrimmed(&fragments, settings));

    Some(Composite { image, raw, layout })
}

/// Same vertical stacking, whole crops, every crop at the left padding.
fn render_untrimmed(fragments: &[Fragment], settings: &CompositorSettings) -> RgbaImage {
    let content_w = fragments.iter().map(|f| f.crop.width()).max().unwrap_or(0);
    let content_h: u32 = fragments.iter().map(|f| f.crop.height()).sum();
    let gaps = settings.fragment_gap * (fragments.len() as u32).saturating_sub(1);

    let mut canvas = white_canvas(
        content_w + settings.left_pad + settings.right_pad,
        content_h + gaps + 2 * settings.vertical_pad,
    );
    let mut y = settings.vertical_pad;
    for f in fragments {
        imageops::replace(&mut canvas, &f.crop, settings.left_pad as i64, y as i64);
        y += f.crop.height() + settings.fragment_gap;
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn block(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, BLACK)
    }

    #[test]
    fn box_to_pixels_scales_pads_and_clamps() {
        let b = BoundingBox::new(100, 0, 500, 1000);
        let r = box_to_pixels(&b, 800, 1000, 10);
        assert_eq!(r, Rect::new(0, 90, 800, 420));
    }

    #[test]
    fn indentation_is_relative_to_leftmost_ink() {
        let settings = CompositorSettings::default();
        let left = Fragment::new(block(50, 20), 0, Rect::new(40, 0, 10, 20));
        let right = Fragment::new(block(50, 30), 10, Rect::new(0, 0, 50, 30));
        assert_eq!(left.absolute_ink_x, 40);
        assert_eq!(right.absolute_ink_x, 10);

        let l = layout(&[left, right], &settings).unwrap();
        assert_eq!(l.min_ink_x, 10);
        assert_eq!(l.placements[0].x, settings.left_pad + 30);
        assert_eq!(l.placements[1].x, settings.left_pad);
    }

    #[test]
    fn width_and_height_laws() {
        let settings = CompositorSettings {
            crop_padding: 0,
            left_pad: 7,
            right_pad: 11,
            vertical_pad: 5,
            fragment_gap: 10,
        };
        let frags = vec![
            Fragment::new(block(100, 40), 200, Rect::new(10, 0, 80, 40)),
            Fragment::new(block(100, 25), 150, Rect::new(5, 5, 90, 15)),
            Fragment::new(block(60, 30), 400, Rect::new(0, 0, 60, 30)),
        ];
        let l = layout(&frags, &settings).unwrap();
        // ink x: 210, 155, 400 → min 155
        let content_w = [210 - 155 + 80, 155 - 155 + 90, 400 - 155 + 60]
            .into_iter()
            .max()
            .unwrap();
        let expected_w = content_w + 7 + 11;
        assert_eq!(l.width, expected_w);
        assert_eq!(l.height, 40 + 15 + 30 + 10 * 2 + 2 * 5);
        assert_eq!(
            l.placements.iter().map(|p| p.y).collect::<Vec<_>>(),
            vec![5, 5 + 40 + 10, 5 + 40 + 10 + 15 + 10]
        );
    }

    #[test]
    fn raw_view_only_when_trimmed() {
        let settings = CompositorSettings::default();
        let untouched = Fragment::new(block(30, 30), 0, Rect::new(0, 0, 30, 30));
        let c = composite_fragments(vec![untouched.clone()], &settings).unwrap();
        assert!(c.raw.is_none());

        let trimmed = Fragment::new(block(30, 30), 0, Rect::new(0, 2, 30, 28));
        let c = composite_fragments(vec![untouched, trimmed], &settings).unwrap();
        let raw = c.raw.expect("raw view");
        assert_eq!(raw.height(), 30 + 30 + settings.fragment_gap + 2 * settings.vertical_pad);
    }

    #[test]
    fn all_degenerate_yields_nothing() {
        let settings = CompositorSettings::default();
        let empty = Fragment::new(block(10, 10), 0, Rect::new(0, 0, 0, 10));
        assert!(composite_fragments(vec![empty], &settings).is_none());
        assert!(composite_fragments(Vec::new(), &settings).is_none());
    }

    #[test]
    fn composite_from_page_draws_content() {
        let mut page = white_canvas(1000, 1000);
        for y in 200..300 {
            for x in 100..400 {
                page.put_pixel(x, y, BLACK);
            }
        }
        let settings = CompositorSettings::default();
        let boxes = [BoundingBox::new(190, 90, 310, 410)];
        let c = composite(&page, &boxes, &settings).unwrap();
        // Crop (80..420, 180..320) has white margins, so nothing is peeled.
        assert!(c.raw.is_none());
        assert_eq!(c.image.width(), 340 + settings.left_pad + settings.right_pad);
        assert_eq!(*c.image.get_pixel(settings.left_pad + 20, settings.vertical_pad + 20), BLACK);
    }
}
