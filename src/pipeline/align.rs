//! Final per-document normalisation: trim-and-pad and common width.

use crate::output::QuestionImage;
use crate::pipeline::trim::trim_and_pad;
use image::{imageops, Rgba, RgbaImage};
use std::collections::HashMap;

/// Background colour of an image: the most common of its four corners,
/// preferring the top-left corner on a tie.
pub fn background_color(img: &RgbaImage) -> Rgba<u8> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Rgba([255, 255, 255, 255]);
    }
    let corners = [
        *img.get_pixel(0, 0),
        *img.get_pixel(w - 1, 0),
        *img.get_pixel(0, h - 1),
        *img.get_pixel(w - 1, h - 1),
    ];
    let mut counts: HashMap<Rgba<u8>, usize> = HashMap::new();
    for c in corners {
        *counts.entry(c).or_default() += 1;
    }
    let best = counts.values().copied().max().unwrap_or(0);
    corners
        .into_iter()
        .find(|c| counts.get(c).copied() == Some(best))
        .unwrap_or(corners[0])
}

/// Widen `img` to `width`, left-aligned, filling with its background colour.
pub fn pad_to_width(img: &RgbaImage, width: u32) -> RgbaImage {
    if img.width() >= width {
        return img.clone();
    }
    let mut out = RgbaImage::from_pixel(width, img.height(), background_color(img));
    imageops::replace(&mut out, img, 0, 0);
    out
}

/// Re-trim every question (and its raw view) and give it a uniform margin.
pub fn trim_and_pad_all(questions: &mut [QuestionImage], padding: u32) {
    for q in questions.iter_mut() {
        q.pixels = trim_and_pad(&q.pixels, padding);
        if let Some(raw) = q.raw_pixels.as_mut() {
            *raw = trim_and_pad(raw, padding);
        }
    }
}

/// Pad every question image to the widest one. Raw views are aligned among
/// themselves.
pub fn align_widths(questions: &mut [QuestionImage]) {
    let Some(max_width) = questions.iter().map(|q| q.pixels.width()).max() else {
        return;
    };
    let max_raw = questions
        .iter()
        .filter_map(|q| q.raw_pixels.as_ref().map(RgbaImage::width))
        .max()
        .unwrap_or(0);

    for q in questions.iter_mut() {
        if q.pixels.width() < max_width {
            q.pixels = pad_to_width(&q.pixels, max_width);
        }
        if let Some(raw) = q.raw_pixels.as_mut() {
            if raw.width() < max_raw {
                *raw = pad_to_width(raw, max_raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(pixels: RgbaImage) -> QuestionImage {
        QuestionImage {
            id: "q".into(),
            page_number: 1,
            pixels,
            raw_pixels: None,
            details: None,
            continuations: 0,
        }
    }

    #[test]
    fn background_prefers_majority_corner() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([240, 240, 230, 255]));
        img.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        assert_eq!(background_color(&img), Rgba([240, 240, 230, 255]));
    }

    #[test]
    fn narrower_images_are_padded_right_with_background() {
        let cream = Rgba([250, 245, 230, 255]);
        let mut qs = vec![
            question(RgbaImage::from_pixel(100, 10, Rgba([255, 255, 255, 255]))),
            question(RgbaImage::from_pixel(60, 20, cream)),
        ];
        let untouched = qs[0].pixels.clone();
        align_widths(&mut qs);

        assert_eq!(qs[0].pixels, untouched);
        assert_eq!(qs[1].pixels.dimensions(), (100, 20));
        assert_eq!(*qs[1].pixels.get_pixel(99, 19), cream);
    }

    #[test]
    fn empty_set_is_fine() {
        let mut qs: Vec<QuestionImage> = vec![];
        align_widths(&mut qs);
        trim_and_pad_all(&mut qs, 10);
    }

    #[test]
    fn trim_and_pad_normalises_margins() {
        let mut img = RgbaImage::from_pixel(50, 50, Rgba([255, 255, 255, 255]));
        img.put_pixel(10, 10, Rgba([0, 0, 0, 255]));
        let mut qs = vec![question(img)];
        trim_and_pad_all(&mut qs, 3);
        assert_eq!(qs[0].pixels.dimensions(), (7, 7));
    }
}
