//! Classical cascade detector (SeetaFace funnel cascade via `rustface`).
//!
//! CPU only. Operates on the luma channel and reports no usable probability,
//! so callers select the largest box.

use image::{imageops, RgbImage};
use std::path::Path;

use super::region::{BoundingBox, FaceCandidate};
use crate::error::{DetectError, Result};

pub struct CascadeDetector {
    detector: Box<dyn rustface::Detector>,
}

impl CascadeDetector {
    /// Load the cascade model. `min_face_size` is handed to the detector so
    /// smaller windows are never evaluated.
    pub fn load(model_path: &Path, min_face_size: u32) -> Result<Self> {
        if !model_path.exists() {
            return Err(DetectError::DetectorUnavailable(format!(
                "cascade model not found at {}",
                model_path.display()
            )));
        }

        let path = model_path.to_str().ok_or_else(|| {
            DetectError::DetectorUnavailable("cascade model path is not valid UTF-8".to_string())
        })?;

        let mut detector = rustface::create_detector(path)
            .map_err(|e| DetectError::DetectorUnavailable(format!("failed to load cascade: {}", e)))?;

        // rustface rejects windows below 20px
        detector.set_min_face_size(min_face_size.max(20));
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        tracing::info!(model = %model_path.display(), "Cascade face detector loaded");
        Ok(Self { detector })
    }

    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceCandidate>> {
        let gray = imageops::grayscale(frame);
        let (width, height) = gray.dimensions();
        let image = rustface::ImageData::new(gray.as_raw(), width, height);

        let faces = self.detector.detect(&image);

        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceCandidate {
                    bbox: BoundingBox {
                        x: bbox.x(),
                        y: bbox.y(),
                        width: bbox.width() as i32,
                        height: bbox.height() as i32,
                    },
                    confidence: None,
                }
            })
            .collect())
    }
}
