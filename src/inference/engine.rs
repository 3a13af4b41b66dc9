//! Applying a trained classifier to images, videos and labeled corpora.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use candle_core::{Device, Tensor, D};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::aggregate::{aggregate, FramePrediction, Prediction, VideoPrediction};
use crate::discovery::{discover_files, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::error::{DetectError, Result};
use crate::label::Label;
use crate::metrics::ClassificationReport;
use crate::model::checkpoint::{Checkpoint, LoadMode};
use crate::model::{preprocess, Classifier};
use crate::training::Corpus;
use crate::video::{SamplePlan, VideoBackend, VideoSource};

/// A model that maps normalized (N, 3, S, S) images to (N, 2) logits.
pub trait ImageClassifier {
    fn input_size(&self) -> usize;

    fn device(&self) -> &Device;

    fn logits(&self, images: &Tensor) -> Result<Tensor>;
}

impl ImageClassifier for Classifier {
    fn input_size(&self) -> usize {
        self.config().input_size
    }

    fn device(&self) -> &Device {
        Classifier::device(self)
    }

    fn logits(&self, images: &Tensor) -> Result<Tensor> {
        Ok(Classifier::logits(self, images, false)?)
    }
}

/// What `predict_batch` looks for in a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Image,
    Video,
}

impl InputKind {
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Image => IMAGE_EXTENSIONS,
            Self::Video => VIDEO_EXTENSIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagePrediction {
    pub image: PathBuf,
    #[serde(flatten)]
    pub prediction: Prediction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchPrediction {
    Image(ImagePrediction),
    Video(VideoPrediction),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRow {
    pub path: PathBuf,
    pub actual: Label,
    pub predicted: Label,
    pub confidence: f32,
}

/// Per-image results over a labeled corpus.
#[derive(Debug, Clone)]
pub struct CorpusEvaluation {
    pub rows: Vec<EvaluationRow>,
    pub report: ClassificationReport,
    /// Images that could not be decoded
    pub skipped: usize,
}

/// Read-only classifier plus the preprocessing it expects.
pub struct InferenceEngine<M = Classifier> {
    model: M,
    source: Option<PathBuf>,
}

impl InferenceEngine<Classifier> {
    /// Load a checkpoint strictly; any mismatch with the stored network shape
    /// is an error.
    pub fn from_checkpoint(path: &Path, device: &Device) -> Result<Self> {
        let checkpoint = Checkpoint::read(path, device)?;
        let classifier = checkpoint.build_classifier(device, LoadMode::Strict)?;
        tracing::info!(
            path = %path.display(),
            parameters = classifier.parameter_count(),
            "Model loaded"
        );
        Ok(Self {
            model: classifier,
            source: Some(path.to_path_buf()),
        })
    }
}

impl<M: ImageClassifier> InferenceEngine<M> {
    pub fn new(model: M) -> Self {
        Self { model, source: None }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Checkpoint the model was loaded from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Classify a batch of images in one forward pass.
    pub fn predict_many(&self, images: &[RgbImage]) -> Result<Vec<Prediction>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let size = self.model.input_size();
        let buffers: Vec<Vec<f32>> = images
            .iter()
            .map(|image| preprocess::normalize(&preprocess::resize(image, size)))
            .collect();
        let batch = preprocess::stack(buffers, size, self.model.device())?;

        let logits = self.model.logits(&batch)?;
        let probabilities = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;

        Ok(probabilities
            .iter()
            .map(|p| Prediction::from_probabilities(p[0], p[1]))
            .collect())
    }

    pub fn predict_rgb(&self, image: &RgbImage) -> Result<Prediction> {
        self.predict_many(std::slice::from_ref(image))?
            .into_iter()
            .next()
            .ok_or_else(|| DetectError::Decode("model returned no prediction".to_string()))
    }

    /// Classify an image file. Unreadable files are a `Decode` error.
    pub fn predict_image(&self, path: &Path) -> Result<Prediction> {
        let image = image::open(path)
            .map_err(|e| DetectError::Decode(format!("{}: {}", path.display(), e)))?
            .to_rgb8();
        self.predict_rgb(&image)
    }

    /// Classify an encoded image (JPEG, PNG, ...) held in memory.
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| DetectError::Decode(e.to_string()))?
            .to_rgb8();
        self.predict_rgb(&image)
    }

    /// Classify a base64 image, optionally given as a `data:` URL.
    pub fn predict_encoded(&self, payload: &str) -> Result<Prediction> {
        let bytes = decode_base64_image(payload)?;
        self.predict_bytes(&bytes)
    }

    /// Classify `frames` evenly spaced full frames of a video and take a
    /// majority vote.
    ///
    /// Returns `None` when the video cannot be opened. Frames that fail to
    /// decode or classify are left out of the vote.
    pub fn predict_video<B: VideoBackend>(&self, backend: &B, path: &Path, frames: usize) -> Option<VideoPrediction> {
        let mut video = match backend.open(path) {
            Ok(video) => video,
            Err(e) => {
                tracing::error!(video = %path.display(), error = %e, "Cannot open video");
                return None;
            }
        };

        let plan = match SamplePlan::compute(video.frame_count(), frames) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(video = %path.display(), error = %e, "No frames to classify");
                return Some(aggregate(path.to_path_buf(), 0, Vec::new()));
            }
        };

        let mut decided = Vec::with_capacity(plan.len());
        for &index in &plan {
            let frame = match video.read_frame(index) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(video = %path.display(), index, error = %e, "Skipping frame");
                    continue;
                }
            };

            match self.predict_rgb(&frame) {
                Ok(prediction) => decided.push(FramePrediction {
                    frame_index: index,
                    prediction,
                }),
                Err(e) => {
                    tracing::debug!(video = %path.display(), index, error = %e, "Frame classification failed");
                }
            }
        }

        let result = aggregate(path.to_path_buf(), plan.len(), decided);
        tracing::info!(
            video = %path.display(),
            prediction = %result.prediction,
            fake_frames = result.fake_frames,
            real_frames = result.real_frames,
            fake_fraction = result.fake_fraction,
            "Video classified"
        );
        Some(result)
    }

    /// Classify every image or video at the top level of `directory`.
    /// Failures are logged and left out.
    pub fn predict_batch<B: VideoBackend>(
        &self,
        backend: &B,
        directory: &Path,
        kind: InputKind,
        frames: usize,
    ) -> Vec<BatchPrediction> {
        let files = discover_files(directory, kind.extensions(), false);
        if files.is_empty() {
            tracing::warn!(directory = %directory.display(), ?kind, "No matching files found");
            return Vec::new();
        }
        tracing::info!(directory = %directory.display(), files = files.len(), ?kind, "Batch prediction");

        let mut results = Vec::with_capacity(files.len());
        for path in files {
            match kind {
                InputKind::Image => match self.predict_image(&path) {
                    Ok(prediction) => results.push(BatchPrediction::Image(ImagePrediction {
                        image: path,
                        prediction,
                    })),
                    Err(e) => tracing::error!(image = %path.display(), error = %e, "Error processing image"),
                },
                InputKind::Video => {
                    if let Some(video) = self.predict_video(backend, &path, frames) {
                        results.push(BatchPrediction::Video(video));
                    }
                }
            }
        }
        results
    }

    /// Classify every image of a `REAL/` + `FAKE/` corpus and score the
    /// predictions against the directory labels.
    pub fn evaluate_corpus(&self, root: &Path, batch_size: usize) -> Result<CorpusEvaluation> {
        let corpus = Corpus::scan(root, None)?;
        let batch_size = batch_size.max(1);

        let mut rows = Vec::with_capacity(corpus.len());
        let mut skipped = 0usize;

        for chunk in corpus.samples().chunks(batch_size) {
            let mut images = Vec::with_capacity(chunk.len());
            let mut kept = Vec::with_capacity(chunk.len());
            for sample in chunk {
                match image::open(&sample.path) {
                    Ok(image) => {
                        images.push(image.to_rgb8());
                        kept.push(sample);
                    }
                    Err(e) => {
                        tracing::warn!(image = %sample.path.display(), error = %e, "Skipping unreadable image");
                        skipped += 1;
                    }
                }
            }

            let predictions = self.predict_many(&images)?;
            for (sample, prediction) in kept.into_iter().zip(predictions) {
                rows.push(EvaluationRow {
                    path: sample.path.clone(),
                    actual: sample.label,
                    predicted: prediction.label,
                    confidence: prediction.confidence,
                });
            }
        }

        let report = ClassificationReport::from_pairs(rows.iter().map(|r| (r.actual, r.predicted)));
        tracing::info!(
            images = rows.len(),
            skipped,
            accuracy = report.accuracy,
            f1 = report.f1,
            "Corpus evaluated"
        );

        Ok(CorpusEvaluation { rows, report, skipped })
    }
}

/// Decode a base64 payload, stripping a `data:<mime>;base64,` prefix.
pub fn decode_base64_image(payload: &str) -> Result<Vec<u8>> {
    let payload = payload.trim();
    let data = match payload.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| DetectError::Decode("data URL has no payload".to_string()))?,
        None => payload,
    };

    BASE64
        .decode(data)
        .map_err(|e| DetectError::Decode(format!("invalid base64 image: {}", e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::net::tiny_config;
    use crate::model::{checkpoint, Adam, AdamParams, TrainingHistory};
    use crate::video::FrameSequenceBackend;
    use image::Rgb;
    use std::io::Cursor;
    use tempfile::tempdir;

    /// Calls anything with a bright red channel FAKE.
    pub(crate) struct RedMeter {
        device: Device,
    }

    impl RedMeter {
        pub(crate) fn new() -> Self {
            Self { device: Device::Cpu }
        }
    }

    impl ImageClassifier for RedMeter {
        fn input_size(&self) -> usize {
            8
        }

        fn device(&self) -> &Device {
            &self.device
        }

        fn logits(&self, images: &Tensor) -> Result<Tensor> {
            let red = images.narrow(1, 0, 1)?.flatten_from(1)?.mean(1)?;
            let zeros = red.zeros_like()?;
            Ok(Tensor::stack(&[&zeros, &(red * 10.0)?], 1)?)
        }
    }

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(24, 16, Rgb([value, 90, 90]))
    }

    #[test]
    fn test_two_two_tie_with_skipped_frame_is_real() {
        let mut backend = FrameSequenceBackend::new();
        backend.insert(
            "clip.mp4",
            vec![Some(solid(240)), Some(solid(10)), None, Some(solid(250)), Some(solid(5))],
        );

        let engine = InferenceEngine::new(RedMeter::new());
        let result = engine.predict_video(&backend, Path::new("clip.mp4"), 5).unwrap();

        assert_eq!(result.frames_planned, 5);
        assert_eq!(result.total_frames_checked, 4);
        assert_eq!((result.real_frames, result.fake_frames), (2, 2));
        assert_eq!(result.prediction, Label::Real);
        assert_eq!(result.fake_fraction, 0.5);
        let indices: Vec<usize> = result.frames.iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_video_without_readable_frames() {
        let mut backend = FrameSequenceBackend::new();
        backend.insert("broken.mp4", vec![None, None, None]);
        backend.insert("empty.mp4", vec![]);
        let engine = InferenceEngine::new(RedMeter::new());

        let broken = engine.predict_video(&backend, Path::new("broken.mp4"), 10).unwrap();
        assert_eq!(broken.frames_planned, 10);
        assert!(broken.is_undecided());
        assert_eq!(broken.fake_fraction, 0.0);

        let empty = engine.predict_video(&backend, Path::new("empty.mp4"), 10).unwrap();
        assert!(empty.is_undecided());

        assert!(engine.predict_video(&backend, Path::new("missing.mp4"), 10).is_none());
    }

    #[test]
    fn test_image_predictions() {
        let engine = InferenceEngine::new(RedMeter::new());
        let fake = engine.predict_rgb(&solid(255)).unwrap();
        assert_eq!(fake.label, Label::Fake);
        assert!(fake.confidence > 0.5);
        assert!((fake.probabilities.real + fake.probabilities.fake - 1.0).abs() < 1e-5);
        assert_eq!(engine.predict_rgb(&solid(0)).unwrap().label, Label::Real);
    }

    #[test]
    fn test_encoded_payloads() {
        let engine = InferenceEngine::new(RedMeter::new());
        let mut png = Vec::new();
        solid(255)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let encoded = BASE64.encode(&png);

        assert_eq!(engine.predict_encoded(&encoded).unwrap().label, Label::Fake);
        let url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(engine.predict_encoded(&url).unwrap().label, Label::Fake);

        assert!(matches!(engine.predict_encoded("***"), Err(DetectError::Decode(_))));
        assert!(matches!(
            engine.predict_encoded(&BASE64.encode(b"not an image")),
            Err(DetectError::Decode(_))
        ));
    }

    #[test]
    fn test_unreadable_image_is_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.jpg");
        std::fs::write(&path, b"garbage").unwrap();
        let engine = InferenceEngine::new(RedMeter::new());
        assert!(matches!(engine.predict_image(&path), Err(DetectError::Decode(_))));
        // the engine is still usable
        assert!(engine.predict_rgb(&solid(1)).is_ok());
    }

    #[test]
    fn test_batch_skips_failures() {
        let dir = tempdir().unwrap();
        solid(255).save(dir.path().join("a.png")).unwrap();
        solid(0).save(dir.path().join("b.png")).unwrap();
        std::fs::write(dir.path().join("c.jpg"), b"garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let engine = InferenceEngine::new(RedMeter::new());
        let results = engine.predict_batch(&FrameSequenceBackend::new(), dir.path(), InputKind::Image, 10);
        assert_eq!(results.len(), 2);
        match &results[0] {
            BatchPrediction::Image(p) => assert_eq!(p.prediction.label, Label::Fake),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_evaluate_corpus() {
        let dir = tempdir().unwrap();
        for (label, value) in [("REAL", 0u8), ("FAKE", 255u8)] {
            std::fs::create_dir_all(dir.path().join(label)).unwrap();
            for i in 0..3 {
                solid(value).save(dir.path().join(label).join(format!("f{}.png", i))).unwrap();
            }
        }
        std::fs::write(dir.path().join("FAKE").join("bad.jpg"), b"garbage").unwrap();

        let engine = InferenceEngine::new(RedMeter::new());
        let evaluation = engine.evaluate_corpus(dir.path(), 2).unwrap();
        assert_eq!(evaluation.rows.len(), 6);
        assert_eq!(evaluation.skipped, 1);
        assert_eq!(evaluation.report.accuracy, 1.0);
        assert_eq!(evaluation.report.confusion.matrix, [[3, 0], [0, 3]]);
    }

    #[test]
    fn test_from_checkpoint() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best_model.safetensors");
        let classifier = Classifier::new(tiny_config(), &Device::Cpu).unwrap();
        let adam = Adam::new(classifier.named_vars().unwrap(), AdamParams::default()).unwrap();
        checkpoint::save(&path, &classifier, &adam, &TrainingHistory::default()).unwrap();

        let engine = InferenceEngine::from_checkpoint(&path, &Device::Cpu).unwrap();
        assert_eq!(engine.source(), Some(path.as_path()));
        assert_eq!(engine.model().input_size(), 16);

        let image = solid(128);
        let expected = {
            let direct = InferenceEngine::new(classifier);
            direct.predict_rgb(&image).unwrap()
        };
        assert_eq!(engine.predict_rgb(&image).unwrap(), expected);
    }
}
