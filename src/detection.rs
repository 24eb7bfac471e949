//! Detection records returned by the question-detection service.
//!
//! The detector answers in one of two record shapes depending on the
//! [`DetectionSchema`] it was prompted with. Both decode into the single
//! [`Detection`] enum so downstream code matches on the shape explicitly
//! instead of probing optional fields.

use serde::{Deserialize, Serialize};

/// Side length of the normalized coordinate space used by the detector.
pub const NORMALIZED_EXTENT: i32 = 1000;

/// Question id that marks the tail of the previous page's last question.
pub const CONTINUATION_ID: &str = "continuation";

/// A rectangle in the detector's 0–1000 page space: `[ymin, xmin, ymax, xmax]`.
///
/// Construction always yields `ymin ≤ ymax` and `xmin ≤ xmax` with every edge
/// inside `0..=1000`, whatever the detector actually sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub ymin: i32,
    pub xmin: i32,
    pub ymax: i32,
    pub xmax: i32,
}

impl BoundingBox {
    pub fn new(ymin: i32, xmin: i32, ymax: i32, xmax: i32) -> Self {
        let clamp = |v: i32| v.clamp(0, NORMALIZED_EXTENT);
        let (ymin, ymax) = (clamp(ymin.min(ymax)), clamp(ymin.max(ymax)));
        let (xmin, xmax) = (clamp(xmin.min(xmax)), clamp(xmin.max(xmax)));
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }

    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    /// Whether `self` lies inside `outer` once `outer` is grown by `tolerance`
    /// on every side.
    pub fn is_within(&self, outer: &BoundingBox, tolerance: i32) -> bool {
        self.ymin >= outer.ymin - tolerance
            && self.xmin >= outer.xmin - tolerance
            && self.ymax <= outer.ymax + tolerance
            && self.xmax <= outer.xmax + tolerance
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = String;

    fn try_from(v: [f64; 4]) -> Result<Self, Self::Error> {
        if v.iter().any(|c| !c.is_finite()) {
            return Err(format!("non-finite box coordinate in {v:?}"));
        }
        Ok(BoundingBox::new(
            v[0].round() as i32,
            v[1].round() as i32,
            v[2].round() as i32,
            v[3].round() as i32,
        ))
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.ymin, b.xmin, b.ymax, b.xmax]
    }
}

/// Which record shape the detector is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSchema {
    /// `{ "id", "boxes" }` only. Cheapest prompt. (default)
    #[default]
    Basic,
    /// Basic fields plus a question type and a one-line summary.
    Detailed,
}

/// `{ id, boxes }` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicDetection {
    pub id: String,
    pub boxes: Vec<BoundingBox>,
}

/// Record produced under [`DetectionSchema::Detailed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedDetection {
    pub id: String,
    pub boxes: Vec<BoundingBox>,
    /// Question type as printed or inferred, e.g. "multiple_choice".
    #[serde(rename = "type")]
    pub kind: String,
    pub summary: String,
}

/// One detected question (or continuation) on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detection {
    // Order matters: serde tries the richer shape first.
    Detailed(DetailedDetection),
    Basic(BasicDetection),
}

impl Detection {
    pub fn basic(id: impl Into<String>, boxes: Vec<BoundingBox>) -> Self {
        Detection::Basic(BasicDetection {
            id: id.into(),
            boxes,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Detection::Basic(d) => &d.id,
            Detection::Detailed(d) => &d.id,
        }
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        match self {
            Detection::Basic(d) => &d.boxes,
            Detection::Detailed(d) => &d.boxes,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.id().trim().eq_ignore_ascii_case(CONTINUATION_ID)
    }

    /// The extra fields of the detailed schema, if this record carries them.
    pub fn details(&self) -> Option<QuestionDetails> {
        match self {
            Detection::Basic(_) => None,
            Detection::Detailed(d) => Some(QuestionDetails {
                kind: d.kind.clone(),
                summary: d.summary.clone(),
            }),
        }
    }
}

/// Detailed-schema fields carried through to the output metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_normalises_order_and_range() {
        let b = BoundingBox::new(500, 1200, 100, -5);
        assert_eq!(b, BoundingBox::new(100, 0, 500, 1000));
        assert!(b.ymin <= b.ymax && b.xmin <= b.xmax);
    }

    #[test]
    fn box_decodes_floats() {
        let b: BoundingBox = serde_json::from_str("[10.4, 20.6, 300, 400]").unwrap();
        assert_eq!(b, BoundingBox::new(10, 21, 300, 400));
        assert_eq!(serde_json::to_string(&b).unwrap(), "[10,21,300,400]");
    }

    #[test]
    fn box_rejects_wrong_arity() {
        assert!(serde_json::from_str::<BoundingBox>("[1, 2, 3]").is_err());
    }

    #[test]
    fn within_tolerance() {
        let outer = BoundingBox::new(100, 100, 500, 500);
        assert!(BoundingBox::new(95, 100, 500, 505).is_within(&outer, 5));
        assert!(!BoundingBox::new(94, 100, 500, 500).is_within(&outer, 5));
    }

    #[test]
    fn decodes_both_schemas() {
        let json = r#"[
            {"id": "1", "boxes": [[0, 0, 100, 100]]},
            {"id": "2", "boxes": [[100, 0, 200, 100]], "type": "essay", "summary": "Prove it"}
        ]"#;
        let dets: Vec<Detection> = serde_json::from_str(json).unwrap();
        assert!(matches!(dets[0], Detection::Basic(_)));
        match &dets[1] {
            Detection::Detailed(d) => assert_eq!(d.kind, "essay"),
            other => panic!("expected detailed, got {other:?}"),
        }
        assert!(dets[0].details().is_none());
        assert_eq!(dets[1].details().unwrap().summary, "Prove it");
    }

    #[test]
    fn continuation_sentinel_is_case_insensitive() {
        assert!(Detection::basic(" Continuation ", vec![]).is_continuation());
        assert!(!Detection::basic("12", vec![]).is_continuation());
    }
}
