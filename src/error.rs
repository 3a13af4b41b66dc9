//! Error types shared by the extraction, training and inference stages.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, DetectError>;

/// Errors raised by the detection pipeline.
///
/// Per-item variants (`FrameDecode`, `Decode`, `VideoOpen`) are caught by the
/// enclosing batch operation and turned into a skipped item. Configuration and
/// shape errors are surfaced to the caller.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Failed to open video {path}: {reason}")]
    VideoOpen { path: PathBuf, reason: String },

    #[error("Failed to decode frame {index}: {reason}")]
    FrameDecode { index: usize, reason: String },

    #[error("Video has no frames")]
    EmptyVideo,

    #[error("No labeled images found under {0}")]
    EmptyDataset(PathBuf),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Checkpoint tensor {key} has shape {found:?}, model expects {expected:?}")]
    CheckpointShapeMismatch {
        key: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Checkpoint is missing tensor {0}")]
    CheckpointMissingKey(String),

    #[error("Checkpoint has unexpected tensor {0}")]
    CheckpointUnexpectedKey(String),

    #[error("Checkpoint {path} is unreadable: {reason}")]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("Face detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("Face detection failed: {0}")]
    Detection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DetectError {
    pub fn video_open(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::VideoOpen {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn frame_decode(index: usize, reason: impl Into<String>) -> Self {
        Self::FrameDecode {
            index,
            reason: reason.into(),
        }
    }

    pub fn corrupt_checkpoint(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CheckpointCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error only affects a single item of a batch operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::VideoOpen { .. }
                | Self::FrameDecode { .. }
                | Self::Decode(_)
                | Self::Detection(_)
                | Self::EmptyVideo
                | Self::EmptyDataset(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(DetectError::frame_decode(3, "short read").is_recoverable());
        assert!(DetectError::video_open("a.mp4", "missing").is_recoverable());
        assert!(!DetectError::CheckpointShapeMismatch {
            key: "model.head.weight".to_string(),
            expected: vec![2, 512],
            found: vec![3, 512],
        }
        .is_recoverable());
        assert!(!DetectError::DetectorUnavailable("no cascade".to_string()).is_recoverable());
    }
}
