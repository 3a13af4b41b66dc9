use image::{imageops, RgbImage};

/// Axis-aligned box in pixel coordinates, as reported by a detector.
///
/// Coordinates may lie partly outside the frame; [`FaceRegion::expand`]
/// clamps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }
}

/// One detector hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    /// Detection probability, when the detector produces one
    pub confidence: Option<f32>,
}

/// How a detector picks one face out of several candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    LargestArea,
    /// Highest confidence; falls back to largest area when any eligible
    /// candidate lacks a score
    HighestConfidence,
}

/// Pick the best candidate whose width and height reach `min_size`.
pub fn select_best(
    candidates: &[FaceCandidate],
    policy: SelectionPolicy,
    min_size: u32,
) -> Option<FaceCandidate> {
    let min_size = min_size as i32;
    let eligible: Vec<&FaceCandidate> = candidates
        .iter()
        .filter(|c| c.bbox.width >= min_size && c.bbox.height >= min_size)
        .collect();

    // Undersized boxes never take part, scored or not
    let all_scored = eligible.iter().all(|c| c.confidence.is_some());

    match policy {
        SelectionPolicy::HighestConfidence if all_scored => eligible
            .into_iter()
            .max_by(|a, b| {
                let (a, b) = (a.confidence.unwrap_or(0.0), b.confidence.unwrap_or(0.0));
                a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .copied(),
        _ => eligible.into_iter().max_by_key(|c| c.bbox.area()).copied(),
    }
}

/// Margin-expanded face box clamped to the frame: `x1 < x2 <= width`,
/// `y1 < y2 <= height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl FaceRegion {
    /// Grow `bbox` by `margin` of its width/height on every side and clamp it
    /// to a `frame_width` x `frame_height` frame. Returns `None` when nothing
    /// of the box remains inside the frame.
    pub fn expand(bbox: &BoundingBox, margin: f32, frame_width: u32, frame_height: u32) -> Option<Self> {
        let margin_w = (bbox.width.max(0) as f32 * margin) as i64;
        let margin_h = (bbox.height.max(0) as f32 * margin) as i64;

        let x1 = (bbox.x as i64 - margin_w).max(0);
        let y1 = (bbox.y as i64 - margin_h).max(0);
        let x2 = (bbox.x as i64 + bbox.width as i64 + margin_w).min(frame_width as i64);
        let y2 = (bbox.y as i64 + bbox.height as i64 + margin_h).min(frame_height as i64);

        if x1 >= x2 || y1 >= y2 {
            return None;
        }

        Some(Self {
            x1: x1 as u32,
            y1: y1 as u32,
            x2: x2 as u32,
            y2: y2 as u32,
        })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Copy the region out of `frame`.
    pub fn crop(&self, frame: &RgbImage) -> RgbImage {
        imageops::crop_imm(frame, self.x1, self.y1, self.width(), self.height()).to_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x: i32, y: i32, w: i32, h: i32, confidence: Option<f32>) -> FaceCandidate {
        FaceCandidate {
            bbox: BoundingBox { x, y, width: w, height: h },
            confidence,
        }
    }

    #[test]
    fn test_largest_area_policy() {
        let faces = [
            candidate(0, 0, 100, 100, None),
            candidate(200, 0, 150, 120, None),
            candidate(400, 0, 90, 90, None),
        ];
        let best = select_best(&faces, SelectionPolicy::LargestArea, 80).unwrap();
        assert_eq!(best.bbox.x, 200);
    }

    #[test]
    fn test_highest_confidence_policy() {
        let faces = [
            candidate(0, 0, 200, 200, Some(0.81)),
            candidate(300, 0, 90, 90, Some(0.99)),
        ];
        let best = select_best(&faces, SelectionPolicy::HighestConfidence, 80).unwrap();
        assert_eq!(best.bbox.x, 300);
    }

    #[test]
    fn test_confidence_policy_without_scores_uses_area() {
        let faces = [candidate(0, 0, 90, 90, Some(0.99)), candidate(300, 0, 200, 200, None)];
        let best = select_best(&faces, SelectionPolicy::HighestConfidence, 80).unwrap();
        assert_eq!(best.bbox.x, 300);
    }

    #[test]
    fn test_unscored_small_face_keeps_confidence_policy() {
        let faces = [
            candidate(0, 0, 20, 20, None),
            candidate(100, 0, 200, 200, Some(0.7)),
            candidate(400, 0, 90, 90, Some(0.95)),
        ];
        let best = select_best(&faces, SelectionPolicy::HighestConfidence, 80).unwrap();
        assert_eq!(best.bbox.x, 400);
    }

    #[test]
    fn test_small_faces_are_rejected() {
        let faces = [candidate(0, 0, 79, 200, Some(0.99)), candidate(0, 0, 200, 40, Some(0.9))];
        assert!(select_best(&faces, SelectionPolicy::HighestConfidence, 80).is_none());
        assert!(select_best(&[], SelectionPolicy::LargestArea, 0).is_none());
    }

    #[test]
    fn test_margin_expansion() {
        let bbox = BoundingBox { x: 100, y: 100, width: 100, height: 50 };
        let region = FaceRegion::expand(&bbox, 0.2, 640, 480).unwrap();
        assert_eq!(region, FaceRegion { x1: 80, y1: 90, x2: 220, y2: 160 });
    }

    #[test]
    fn test_clamping_to_frame_bounds() {
        let boxes = [
            BoundingBox { x: -30, y: -10, width: 100, height: 100 },
            BoundingBox { x: 600, y: 440, width: 100, height: 100 },
            BoundingBox { x: 0, y: 0, width: 640, height: 480 },
            BoundingBox { x: 5, y: 5, width: 1, height: 1 },
        ];
        for bbox in &boxes {
            for margin in [0.0, 0.2, 1.0, 2.5] {
                let region = FaceRegion::expand(bbox, margin, 640, 480).unwrap();
                assert!(region.x1 < region.x2 && region.x2 <= 640);
                assert!(region.y1 < region.y2 && region.y2 <= 480);
            }
        }
    }

    #[test]
    fn test_box_outside_frame_has_no_region() {
        let bbox = BoundingBox { x: 700, y: 10, width: 50, height: 50 };
        assert!(FaceRegion::expand(&bbox, 0.2, 640, 480).is_none());
    }

    #[test]
    fn test_crop_dimensions() {
        let frame = RgbImage::new(64, 48);
        let region = FaceRegion { x1: 10, y1: 5, x2: 30, y2: 45 };
        let crop = region.crop(&frame);
        assert_eq!(crop.dimensions(), (20, 40));
    }
}
