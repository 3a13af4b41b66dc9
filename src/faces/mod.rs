//! Face localization for frame extraction.
//!
//! Two interchangeable detectors sit behind [`FaceDetect`]. Which one is used
//! is decided once, when the extractor is built, by [`FaceDetector::negotiate`].

pub mod cascade;
pub mod neural;
pub mod region;

use image::RgbImage;

use crate::config::{DetectorKind, ExtractConfig};
use crate::error::{DetectError, Result};

pub use cascade::CascadeDetector;
pub use neural::NeuralDetector;
pub use region::{select_best, BoundingBox, FaceCandidate, FaceRegion, SelectionPolicy};

/// Anything that can propose face boxes for a frame.
pub trait FaceDetect {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceCandidate>>;

    /// How the best candidate is chosen when several faces are found.
    fn policy(&self) -> SelectionPolicy;
}

/// The detector chosen for a run.
pub enum FaceDetector {
    Cascade(CascadeDetector),
    Neural(NeuralDetector),
}

impl FaceDetector {
    /// Build the requested detector, substituting the cascade when the
    /// neural runtime or model cannot be loaded.
    pub fn negotiate(kind: DetectorKind, config: &ExtractConfig) -> Result<Self> {
        if kind == DetectorKind::Neural {
            match NeuralDetector::load(
                &config.neural_model,
                config.neural_confidence,
                config.nms_threshold,
            ) {
                Ok(detector) => return Ok(Self::Neural(detector)),
                Err(e) => {
                    tracing::warn!(error = %e, "Neural face detector unavailable, falling back to cascade");
                }
            }
        }

        let cascade = CascadeDetector::load(&config.cascade_model, config.min_face_size)
            .map_err(|e| match e {
                DetectError::DetectorUnavailable(reason) => DetectError::DetectorUnavailable(
                    format!("no usable face detector: {}", reason),
                ),
                other => other,
            })?;
        Ok(Self::Cascade(cascade))
    }

    pub fn kind(&self) -> DetectorKind {
        match self {
            Self::Cascade(_) => DetectorKind::Cascade,
            Self::Neural(_) => DetectorKind::Neural,
        }
    }
}

impl FaceDetect for FaceDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceCandidate>> {
        match self {
            Self::Cascade(d) => d.detect(frame),
            Self::Neural(d) => d.detect(frame),
        }
    }

    fn policy(&self) -> SelectionPolicy {
        match self {
            Self::Cascade(_) => SelectionPolicy::LargestArea,
            Self::Neural(_) => SelectionPolicy::HighestConfidence,
        }
    }
}

impl<D: FaceDetect + ?Sized> FaceDetect for Box<D> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<FaceCandidate>> {
        (**self).detect(frame)
    }

    fn policy(&self) -> SelectionPolicy {
        (**self).policy()
    }
}

/// Locate the best face in `frame` and expand it by `margin`.
///
/// Returns `Ok(None)` when no candidate reaches `min_face_size`, or when the
/// expanded box, once clamped to the frame, is narrower or shorter than
/// `min_face_size`.
pub fn extract_face_region<D: FaceDetect + ?Sized>(
    frame: &RgbImage,
    detector: &mut D,
    margin: f32,
    min_face_size: u32,
) -> Result<Option<FaceRegion>> {
    let candidates = detector.detect(frame)?;
    let Some(best) = select_best(&candidates, detector.policy(), min_face_size) else {
        return Ok(None);
    };

    let (width, height) = frame.dimensions();
    Ok(FaceRegion::expand(&best.bbox, margin, width, height)
        .filter(|region| region.width() >= min_face_size && region.height() >= min_face_size))
}
