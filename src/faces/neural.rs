//! Neural multi-box detector (UltraFace RFB-320 via ONNX Runtime).
//!
//! Each box carries a face probability, so callers select by confidence.

use image::{imageops, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;

use super::region::{BoundingBox, FaceCandidate};
use crate::error::{DetectError, Result};

const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;

const MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

pub struct NeuralDetector {
    session: Session,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl NeuralDetector {
    /// Load the UltraFace session, downloading the model when it is missing.
    ///
    /// Any failure here (no onnxruntime library, no network, bad model) is
    /// reported as `DetectorUnavailable` so the caller can fall back.
    pub fn load(model_path: &Path, confidence_threshold: f32, nms_threshold: f32) -> Result<Self> {
        ensure_model(model_path)?;

        // With load-dynamic, a missing onnxruntime library panics inside ort
        let built = std::panic::catch_unwind(|| -> anyhow::Result<Session> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(model_path)?;
            Ok(session)
        });

        let session = match built {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return Err(DetectError::DetectorUnavailable(format!(
                    "failed to create ONNX session: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(DetectError::DetectorUnavailable(
                    "ONNX Runtime library could not be loaded".to_string(),
                ))
            }
        };

        tracing::info!(model = %model_path.display(), "Neural face detector loaded");
        Ok(Self {
            session,
            confidence_threshold,
            nms_threshold,
        })
    }

    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceCandidate>> {
        let (orig_width, orig_height) = frame.dimensions();

        let input = preprocess(frame);
        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
            input.into_boxed_slice(),
        ))
        .map_err(|e| DetectError::Detection(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs!["input" => input_tensor])
            .map_err(|e| DetectError::Detection(e.to_string()))?;

        let scores_value = outputs
            .get("scores")
            .ok_or_else(|| DetectError::Detection("no scores output".to_string()))?;
        let boxes_value = outputs
            .get("boxes")
            .ok_or_else(|| DetectError::Detection("no boxes output".to_string()))?;

        let (scores_shape, scores_data) = scores_value
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::Detection(e.to_string()))?;
        let (_boxes_shape, boxes_data) = boxes_value
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::Detection(e.to_string()))?;

        let num_anchors = scores_shape
            .get(1)
            .and_then(|&n| usize::try_from(n).ok())
            .ok_or_else(|| DetectError::Detection(format!("unexpected scores shape {:?}", scores_shape)))?;
        let candidates = decode_outputs(
            num_anchors,
            scores_data,
            boxes_data,
            (orig_width, orig_height),
            self.confidence_threshold,
        )?;

        Ok(nms(candidates, self.nms_threshold))
    }
}

/// Turn raw UltraFace outputs into frame-space candidates above `threshold`.
///
/// `scores` is `[anchors, 2]` (background, face) and `boxes` is `[anchors, 4]`
/// normalized corners, both flattened.
fn decode_outputs(
    num_anchors: usize,
    scores: &[f32],
    boxes: &[f32],
    (frame_width, frame_height): (u32, u32),
    threshold: f32,
) -> Result<Vec<FaceCandidate>> {
    if scores.len() < num_anchors * 2 || boxes.len() < num_anchors * 4 {
        return Err(DetectError::Detection(format!(
            "{} anchors need {} scores and {} box values, got {} and {}",
            num_anchors,
            num_anchors * 2,
            num_anchors * 4,
            scores.len(),
            boxes.len()
        )));
    }

    let candidates = scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .take(num_anchors)
        .filter(|(score, _)| score[1] > threshold)
        .map(|(score, corners)| {
            let x1 = (corners[0] * frame_width as f32) as i32;
            let y1 = (corners[1] * frame_height as f32) as i32;
            let x2 = (corners[2] * frame_width as f32) as i32;
            let y2 = (corners[3] * frame_height as f32) as i32;

            FaceCandidate {
                bbox: BoundingBox {
                    x: x1,
                    y: y1,
                    width: (x2 - x1).max(1),
                    height: (y2 - y1).max(1),
                },
                confidence: Some(score[1]),
            }
        })
        .collect();

    Ok(candidates)
}

/// Download the model file if it does not exist yet.
fn ensure_model(model_path: &Path) -> Result<()> {
    if model_path.exists() {
        return Ok(());
    }

    if let Some(parent) = model_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %model_path.display(), "Downloading UltraFace model...");
    let response = ureq::get(MODEL_URL)
        .call()
        .map_err(|e| DetectError::DetectorUnavailable(format!("failed to download model: {}", e)))?;

    let mut file = std::fs::File::create(model_path)?;
    if let Err(e) = std::io::copy(&mut response.into_reader(), &mut file) {
        let _ = std::fs::remove_file(model_path);
        return Err(DetectError::DetectorUnavailable(format!(
            "failed to download model: {}",
            e
        )));
    }
    tracing::info!(path = %model_path.display(), "UltraFace model downloaded");

    Ok(())
}

/// Resize to the network input and lay out as normalized NCHW floats.
fn preprocess(frame: &RgbImage) -> Vec<f32> {
    let resized = imageops::resize(frame, INPUT_WIDTH, INPUT_HEIGHT, imageops::FilterType::Triangle);
    let plane = (INPUT_WIDTH * INPUT_HEIGHT) as usize;
    let mut input = vec![0.0f32; 3 * plane];

    for (idx, pixel) in resized.pixels().enumerate() {
        input[idx] = (pixel[0] as f32 - 127.0) / 128.0;
        input[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
        input[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
    }

    input
}

/// Non-maximum suppression over scored candidates.
fn nms(mut boxes: Vec<FaceCandidate>, threshold: f32) -> Vec<FaceCandidate> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceCandidate> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| compute_iou(&k.bbox, &candidate.bbox) <= threshold) {
            keep.push(candidate);
        }
    }

    keep
}

fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) as i64 * (y2 - y1).max(0) as i64) as f32;
    let union = a.area() as f32 + b.area() as f32 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(x: i32, y: i32, size: i32, confidence: f32) -> FaceCandidate {
        FaceCandidate {
            bbox: BoundingBox { x, y, width: size, height: size },
            confidence: Some(confidence),
        }
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        assert!((compute_iou(&a, &a) - 1.0).abs() < 0.001);

        let c = BoundingBox { x: 20, y: 20, width: 10, height: 10 };
        assert!((compute_iou(&a, &c) - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_boxes() {
        let boxes = vec![
            scored(0, 0, 100, 0.8),
            scored(5, 5, 100, 0.95),
            scored(300, 300, 50, 0.75),
        ];
        let kept = nms(boxes, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, Some(0.95));
        assert_eq!(kept[1].bbox.x, 300);
    }

    #[test]
    fn test_decode_scales_boxes_to_frame() {
        let scores = [0.9, 0.1, 0.2, 0.8];
        let boxes = [0.0, 0.0, 0.5, 0.5, 0.25, 0.5, 0.75, 1.0];
        let faces = decode_outputs(2, &scores, &boxes, (640, 480), 0.7).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox, BoundingBox { x: 160, y: 240, width: 320, height: 240 });
        assert_eq!(faces[0].confidence, Some(0.8));
    }

    #[test]
    fn test_decode_rejects_short_outputs() {
        let boxes = [0.0, 0.0, 0.5, 0.5, 0.25, 0.5, 0.75, 1.0];
        let short_scores = [0.1, 0.9, 0.1];
        assert!(matches!(
            decode_outputs(2, &short_scores, &boxes, (640, 480), 0.7),
            Err(DetectError::Detection(_))
        ));

        let scores = [0.1, 0.9, 0.1, 0.9];
        assert!(matches!(
            decode_outputs(2, &scores, &boxes[..6], (640, 480), 0.7),
            Err(DetectError::Detection(_))
        ));
        assert!(decode_outputs(0, &[], &[], (640, 480), 0.7).unwrap().is_empty());
    }

    #[test]
    fn test_preprocess_layout() {
        let frame = RgbImage::from_pixel(64, 48, image::Rgb([255, 127, 0]));
        let input = preprocess(&frame);
        let plane = (INPUT_WIDTH * INPUT_HEIGHT) as usize;
        assert_eq!(input.len(), 3 * plane);
        assert!((input[0] - 1.0).abs() < 0.01);
        assert!(input[plane].abs() < 0.01);
        assert!((input[2 * plane] + 127.0 / 128.0).abs() < 0.01);
    }
}
