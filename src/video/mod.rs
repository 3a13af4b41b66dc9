//! Video access: sample planning and frame decoding backends.

pub mod ffmpeg;
pub mod sampler;

use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{DetectError, Result};

pub use ffmpeg::FfmpegBackend;
pub use sampler::SamplePlan;

/// An opened video that can decode individual frames by index.
pub trait VideoSource {
    fn frame_count(&self) -> usize;

    /// Seek to `index` and decode that frame as RGB.
    fn read_frame(&mut self, index: usize) -> Result<RgbImage>;
}

/// Opens video files.
pub trait VideoBackend {
    type Video: VideoSource;

    fn open(&self, path: &Path) -> Result<Self::Video>;
}

/// Backend over clips that are already decoded in memory.
///
/// Frames set to `None` fail to decode, which lets capture code hand over
/// partially broken clips unchanged.
#[derive(Debug, Clone, Default)]
pub struct FrameSequenceBackend {
    clips: HashMap<PathBuf, Vec<Option<RgbImage>>>,
}

impl FrameSequenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, frames: Vec<Option<RgbImage>>) {
        self.clips.insert(path.into(), frames);
    }
}

/// A clip served by [`FrameSequenceBackend`].
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<Option<RgbImage>>,
}

impl VideoSource for FrameSequence {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&mut self, index: usize) -> Result<RgbImage> {
        match self.frames.get(index) {
            Some(Some(frame)) => Ok(frame.clone()),
            Some(None) => Err(DetectError::frame_decode(index, "frame is corrupt")),
            None => Err(DetectError::frame_decode(index, "index past end of clip")),
        }
    }
}

impl VideoBackend for FrameSequenceBackend {
    type Video = FrameSequence;

    fn open(&self, path: &Path) -> Result<FrameSequence> {
        self.clips
            .get(path)
            .map(|frames| FrameSequence {
                frames: frames.clone(),
            })
            .ok_or_else(|| DetectError::video_open(path, "no such clip"))
    }
}

/// Video stem used to name extracted frames.
pub fn video_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_frame_sequence_reports_corrupt_frames() {
        let mut backend = FrameSequenceBackend::new();
        backend.insert(
            "clip.mp4",
            vec![Some(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))), None],
        );

        let mut video = backend.open(Path::new("clip.mp4")).unwrap();
        assert_eq!(video.frame_count(), 2);
        assert!(video.read_frame(0).is_ok());
        assert!(matches!(video.read_frame(1), Err(DetectError::FrameDecode { index: 1, .. })));
        assert!(video.read_frame(2).is_err());
    }

    #[test]
    fn test_unknown_clip_fails_to_open() {
        let backend = FrameSequenceBackend::new();
        assert!(matches!(
            backend.open(Path::new("missing.mp4")),
            Err(DetectError::VideoOpen { .. })
        ));
    }

    #[test]
    fn test_video_stem() {
        assert_eq!(video_stem(Path::new("/data/videos/000_003.mp4")), "000_003");
    }
}
