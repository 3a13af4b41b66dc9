use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::DetectError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extract: ExtractConfig,

    #[serde(default)]
    pub train: TrainConfig,

    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Multi-box neural detector (UltraFace via ONNX Runtime)
    #[default]
    Neural,
    /// Classical funnel cascade (SeetaFace via rustface)
    Cascade,
}

impl std::str::FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "neural" | "ultraface" => Ok(Self::Neural),
            "cascade" | "seeta" => Ok(Self::Cascade),
            other => Err(format!("unknown detector '{}', expected neural or cascade", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Frames sampled per video
    #[serde(default = "default_frames_per_video")]
    pub frames_per_video: usize,

    /// Output crop size as (width, height)
    #[serde(default = "default_output_size")]
    pub output_size: (u32, u32),

    #[serde(default)]
    pub detector: DetectorKind,

    /// Relative margin added on each side of a detected face
    #[serde(default = "default_face_margin")]
    pub face_margin: f32,

    /// Minimum detected face width/height in pixels
    #[serde(default = "default_min_face_size")]
    pub min_face_size: u32,

    #[serde(default = "default_cascade_model")]
    pub cascade_model: PathBuf,

    /// UltraFace model; downloaded on first use when missing
    #[serde(default = "default_neural_model")]
    pub neural_model: PathBuf,

    #[serde(default = "default_neural_confidence")]
    pub neural_confidence: f32,

    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,

    /// Output root holding REAL/ and FAKE/
    #[serde(default = "default_frames_root")]
    pub output_root: PathBuf,
}

fn default_frames_per_video() -> usize {
    10
}

fn default_output_size() -> (u32, u32) {
    (224, 224)
}

fn default_face_margin() -> f32 {
    0.2
}

fn default_min_face_size() -> u32 {
    80
}

fn default_cascade_model() -> PathBuf {
    models_dir().join("seeta_fd_frontal_v1.0.bin")
}

fn default_neural_model() -> PathBuf {
    models_dir().join("ultraface-320.onnx")
}

fn default_neural_confidence() -> f32 {
    0.7
}

fn default_nms_threshold() -> f32 {
    0.3
}

fn default_frames_root() -> PathBuf {
    PathBuf::from("frames_dataset")
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            frames_per_video: default_frames_per_video(),
            output_size: default_output_size(),
            detector: DetectorKind::default(),
            face_margin: default_face_margin(),
            min_face_size: default_min_face_size(),
            cascade_model: default_cascade_model(),
            neural_model: default_neural_model(),
            neural_confidence: default_neural_confidence(),
            nms_threshold: default_nms_threshold(),
            output_root: default_frames_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    #[serde(default = "default_frames_root")]
    pub data_path: PathBuf,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,

    #[serde(default = "default_val_split")]
    pub val_split: f32,

    /// Consecutive non-improving epochs before training stops
    #[serde(default = "default_early_stopping_patience")]
    pub early_stopping_patience: usize,

    /// Non-improving epochs tolerated before the learning rate is reduced
    #[serde(default = "default_lr_patience")]
    pub lr_patience: usize,

    #[serde(default = "default_lr_factor")]
    pub lr_factor: f64,

    /// Decode threads for the batch loader (0 = load on the training thread)
    #[serde(default)]
    pub num_workers: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Cap on images per class, for quick experiments
    #[serde(default)]
    pub limit_samples: Option<usize>,

    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    #[serde(default)]
    pub resume: Option<PathBuf>,
}

fn default_batch_size() -> usize {
    32
}

fn default_epochs() -> usize {
    20
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_weight_decay() -> f64 {
    1e-5
}

fn default_val_split() -> f32 {
    0.2
}

fn default_early_stopping_patience() -> usize {
    5
}

fn default_lr_patience() -> usize {
    3
}

fn default_lr_factor() -> f64 {
    0.5
}

fn default_seed() -> u64 {
    42
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("best_model.safetensors")
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_path: default_frames_root(),
            batch_size: default_batch_size(),
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            weight_decay: default_weight_decay(),
            val_split: default_val_split(),
            early_stopping_patience: default_early_stopping_patience(),
            lr_patience: default_lr_patience(),
            lr_factor: default_lr_factor(),
            num_workers: 0,
            seed: default_seed(),
            limit_samples: None,
            checkpoint_path: default_checkpoint_path(),
            resume: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Frames sampled from a video for video-level prediction
    #[serde(default = "default_frames_per_video")]
    pub frames_to_check: usize,

    /// Square classifier input size in pixels
    #[serde(default = "default_input_size")]
    pub input_size: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_input_size() -> usize {
    224
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: default_checkpoint_path(),
            frames_to_check: default_frames_per_video(),
            input_size: default_input_size(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extract: ExtractConfig::default(),
            train: TrainConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("DEEPFAKE_GUARD_CONFIG") {
            return Self::load_from(Path::new(&path));
        }

        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Reject values that would make a stage meaningless.
    pub fn validate(&self) -> std::result::Result<(), DetectError> {
        let invalid = |msg: &str| Err(DetectError::Config(msg.to_string()));

        if self.extract.frames_per_video == 0 {
            return invalid("extract.frames_per_video must be at least 1");
        }
        if self.extract.output_size.0 == 0 || self.extract.output_size.1 == 0 {
            return invalid("extract.output_size must be non-zero");
        }
        if self.extract.face_margin < 0.0 {
            return invalid("extract.face_margin must not be negative");
        }
        if self.train.batch_size == 0 {
            return invalid("train.batch_size must be at least 1");
        }
        if !(0.0..1.0).contains(&self.train.val_split) {
            return invalid("train.val_split must be in [0, 1)");
        }
        if self.train.learning_rate <= 0.0 {
            return invalid("train.learning_rate must be positive");
        }
        if !(self.train.lr_factor > 0.0 && self.train.lr_factor < 1.0) {
            return invalid("train.lr_factor must be in (0, 1)");
        }
        if self.inference.frames_to_check == 0 {
            return invalid("inference.frames_to_check must be at least 1");
        }
        if self.inference.batch_size == 0 {
            return invalid("inference.batch_size must be at least 1");
        }
        if self.inference.input_size == 0 {
            return invalid("inference.input_size must be non-zero");
        }
        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deepfake-guard")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Directory holding face detector weights.
pub fn models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deepfake-guard")
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_pipeline_settings() {
        let config = Config::default();
        assert_eq!(config.extract.frames_per_video, 10);
        assert_eq!(config.extract.output_size, (224, 224));
        assert_eq!(config.extract.min_face_size, 80);
        assert_eq!(config.train.early_stopping_patience, 5);
        assert_eq!(config.train.lr_patience, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[train]\nepochs = 3\nbatch_size = 4\n\n[extract]\ndetector = \"cascade\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.train.epochs, 3);
        assert_eq!(config.train.batch_size, 4);
        assert_eq!(config.train.learning_rate, 1e-3);
        assert_eq!(config.extract.detector, DetectorKind::Cascade);
        assert_eq!(config.inference.frames_to_check, 10);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.train.limit_samples = Some(50);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.train.limit_samples, Some(50));
    }

    #[test]
    fn test_validate_rejects_bad_split() {
        let mut config = Config::default();
        config.train.val_split = 1.0;
        assert!(matches!(config.validate(), Err(DetectError::Config(_))));

        let mut config = Config::default();
        config.train.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sample_counts() {
        let mut config = Config::default();
        config.extract.frames_per_video = 0;
        assert!(matches!(config.validate(), Err(DetectError::Config(_))));

        let mut config = Config::default();
        config.inference.frames_to_check = 0;
        assert!(matches!(config.validate(), Err(DetectError::Config(_))));

        let mut config = Config::default();
        config.inference.batch_size = 0;
        assert!(matches!(config.validate(), Err(DetectError::Config(_))));
    }

    #[test]
    fn test_load_rejects_zero_frames_per_video() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[extract]\nframes_per_video = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_detector_names() {
        assert_eq!("Neural".parse::<DetectorKind>(), Ok(DetectorKind::Neural));
        assert_eq!("cascade".parse::<DetectorKind>(), Ok(DetectorKind::Cascade));
        assert!("mtcnn".parse::<DetectorKind>().is_err());
    }
}
