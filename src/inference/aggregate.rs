//! Video-level majority vote over per-frame predictions.

use serde::Serialize;
use std::path::PathBuf;

use crate::label::Label;

/// A value per class, serialized as `{"REAL": .., "FAKE": ..}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerClass {
    #[serde(rename = "REAL")]
    pub real: f32,
    #[serde(rename = "FAKE")]
    pub fake: f32,
}

impl PerClass {
    pub fn get(&self, label: Label) -> f32 {
        match label {
            Label::Real => self.real,
            Label::Fake => self.fake,
        }
    }
}

/// Classifier verdict for one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    #[serde(rename = "prediction")]
    pub label: Label,
    /// Softmax probability of `label`
    pub confidence: f32,
    pub probabilities: PerClass,
}

impl Prediction {
    /// Argmax over softmax probabilities; an exact tie goes to REAL.
    pub fn from_probabilities(real: f32, fake: f32) -> Self {
        let label = if fake > real { Label::Fake } else { Label::Real };
        let probabilities = PerClass { real, fake };
        Self {
            label,
            confidence: probabilities.get(label),
            probabilities,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FramePrediction {
    pub frame_index: usize,
    #[serde(flatten)]
    pub prediction: Prediction,
}

/// Aggregated verdict for one video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoPrediction {
    pub video: PathBuf,
    /// Frames in the sample plan
    pub frames_planned: usize,
    /// Frames that produced a prediction
    pub total_frames_checked: usize,
    pub real_frames: usize,
    pub fake_frames: usize,
    /// Majority vote; FAKE only when FAKE votes strictly outnumber REAL votes
    pub prediction: Label,
    /// FAKE votes over decided frames, 0 when no frame was decided
    pub fake_fraction: f64,
    /// Mean class probabilities over decided frames, 0 when none
    pub average_confidences: PerClass,
    pub frames: Vec<FramePrediction>,
}

impl VideoPrediction {
    /// Whether no sampled frame could be classified.
    pub fn is_undecided(&self) -> bool {
        self.total_frames_checked == 0
    }
}

/// Combine frame predictions into a video verdict.
pub fn aggregate(video: PathBuf, frames_planned: usize, frames: Vec<FramePrediction>) -> VideoPrediction {
    let fake_frames = frames.iter().filter(|f| f.prediction.label == Label::Fake).count();
    let real_frames = frames.len() - fake_frames;
    let decided = frames.len();

    // Strict comparison: a tied vote is REAL
    let prediction = if fake_frames > real_frames { Label::Fake } else { Label::Real };

    let (fake_fraction, average_confidences) = if decided == 0 {
        (0.0, PerClass::default())
    } else {
        let n = decided as f32;
        let real = frames.iter().map(|f| f.prediction.probabilities.real).sum::<f32>() / n;
        let fake = frames.iter().map(|f| f.prediction.probabilities.fake).sum::<f32>() / n;
        (fake_frames as f64 / decided as f64, PerClass { real, fake })
    };

    VideoPrediction {
        video,
        frames_planned,
        total_frames_checked: decided,
        real_frames,
        fake_frames,
        prediction,
        fake_fraction,
        average_confidences,
        frames,
    }
}
