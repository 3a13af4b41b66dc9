//! Turns labeled videos into a corpus of face crops.
//!
//! Output layout: `<root>/REAL/<video>_frame_<NNN>.jpg` and
//! `<root>/FAKE/<video>_frame_<NNN>.jpg`, where `NNN` counts the frames
//! emitted for that video.

pub mod dataset;

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::config::ExtractConfig;
use crate::discovery::discover_files;
use crate::error::{DetectError, Result};
use crate::faces::{extract_face_region, FaceDetect};
use crate::label::Label;
use crate::video::{video_stem, SamplePlan, VideoBackend, VideoSource};

pub use dataset::{corpus_stats, CorpusStats};

const JPEG_QUALITY: u8 = 95;

/// Counts reported by a batch extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub real_frames: usize,
    pub fake_frames: usize,
    pub videos_processed: usize,
    pub videos_skipped: usize,
}

impl ExtractionReport {
    pub fn total_frames(&self) -> usize {
        self.real_frames + self.fake_frames
    }

    fn record(&mut self, label: Label, frames: usize) {
        self.videos_processed += 1;
        match label {
            Label::Real => self.real_frames += frames,
            Label::Fake => self.fake_frames += frames,
        }
    }

    pub fn merge(&mut self, other: &ExtractionReport) {
        self.real_frames += other.real_frames;
        self.fake_frames += other.fake_frames;
        self.videos_processed += other.videos_processed;
        self.videos_skipped += other.videos_skipped;
    }
}

/// Samples frames from videos, crops the face and writes labeled images.
pub struct FrameExtractor<D, B> {
    detector: D,
    backend: B,
    output_root: PathBuf,
    output_size: (u32, u32),
    face_margin: f32,
    min_face_size: u32,
}

impl<D: FaceDetect, B: VideoBackend> FrameExtractor<D, B> {
    pub fn new(detector: D, backend: B, config: &ExtractConfig) -> Self {
        Self {
            detector,
            backend,
            output_root: config.output_root.clone(),
            output_size: config.output_size,
            face_margin: config.face_margin,
            min_face_size: config.min_face_size,
        }
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Extract up to `sample_count` face crops from one video.
    ///
    /// Frames that fail to decode, frames without a usable face and frames
    /// whose detection fails recoverably are skipped. Anything else, such as
    /// a failed write, aborts the video. Returns the number of images written.
    pub fn extract_frames(&mut self, video_path: &Path, label: Label, sample_count: usize) -> Result<usize> {
        if sample_count == 0 {
            return Err(DetectError::Config("frames per video must be at least 1".to_string()));
        }
        let mut video = self.backend.open(video_path)?;
        let plan = SamplePlan::compute(video.frame_count(), sample_count)?;

        let class_dir = self.output_root.join(label.dir_name());
        std::fs::create_dir_all(&class_dir)?;
        let stem = video_stem(video_path);

        let mut emitted = 0usize;
        for &index in &plan {
            let frame = match video.read_frame(index) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(video = %video_path.display(), index, error = %e, "Skipping undecodable frame");
                    continue;
                }
            };

            let region = match extract_face_region(&frame, &mut self.detector, self.face_margin, self.min_face_size) {
                Ok(Some(region)) => region,
                Ok(None) => {
                    tracing::debug!(video = %video_path.display(), index, "No face found");
                    continue;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(video = %video_path.display(), index, error = %e, "Face detection failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let crop = region.crop(&frame);
            let (width, height) = self.output_size;
            let resized = imageops::resize(&crop, width, height, imageops::FilterType::Triangle);

            let output = class_dir.join(frame_file_name(&stem, emitted));
            write_jpeg(&resized, &output)?;
            emitted += 1;
        }

        tracing::info!(
            video = %video_path.display(),
            label = %label,
            planned = plan.len(),
            extracted = emitted,
            "Extracted frames"
        );
        Ok(emitted)
    }

    /// Extract every video in `directory` (top level only). Videos that fail
    /// recoverably are logged and counted as skipped; any other failure stops
    /// the batch.
    pub fn extract_directory(&mut self, directory: &Path, label: Label, sample_count: usize) -> Result<ExtractionReport> {
        let mut report = ExtractionReport::default();

        if !directory.is_dir() {
            tracing::warn!(directory = %directory.display(), "Video directory not found, skipping");
            return Ok(report);
        }

        let videos = discover_files(directory, &["mp4"], false);
        tracing::info!(directory = %directory.display(), videos = videos.len(), label = %label, "Processing videos");

        for video in &videos {
            match self.extract_frames(video, label, sample_count) {
                Ok(frames) => report.record(label, frames),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(video = %video.display(), error = %e, "Skipping video");
                    report.videos_skipped += 1;
                }
                Err(e) => {
                    tracing::error!(video = %video.display(), error = %e, "Extraction aborted");
                    return Err(e);
                }
            }
        }

        Ok(report)
    }
}

/// `<stem>_frame_<NNN>.jpg`
pub fn frame_file_name(stem: &str, counter: usize) -> String {
    format!("{}_frame_{:03}.jpg", stem, counter)
}

fn write_jpeg(image: &RgbImage, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    encoder.encode_image(image)?;
    Ok(())
}
