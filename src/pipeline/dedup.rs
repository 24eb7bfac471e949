//! Box deduplication within one detection.
//!
//! Detectors regularly emit a question's full box together with a smaller box
//! for one of its parts, or the same box twice with jittered edges. Both
//! would be composited twice. A box is dropped when another box of the same
//! detection contains it (within a small tolerance); of two boxes that contain
//! each other the later one goes.
//!
//! The surviving boxes keep their original relative order: the compositor
//! trusts that order as the reading order across columns and pages.

use crate::detection::BoundingBox;

/// Default containment tolerance in normalized (0–1000) units.
pub const DEFAULT_TOLERANCE: i32 = 10;

/// Remove boxes subsumed by another box of the same detection.
pub fn dedup_boxes(boxes: &[BoundingBox], tolerance: i32) -> Vec<BoundingBox> {
    let removed: Vec<bool> = (0..boxes.len())
        .map(|i| {
            boxes.iter().enumerate().any(|(j, outer)| {
                if i == j || !boxes[i].is_within(outer, tolerance) {
                    return false;
                }
                let mutual = outer.is_within(&boxes[i], tolerance);
                !mutual || j < i
            })
        })
        .collect();

    boxes
        .iter()
        .zip(removed)
        .filter(|(_, gone)| !gone)
        .map(|(b, _)| *b)
        .collect()
}
