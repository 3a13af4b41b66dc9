//! Classifying images and videos with a trained checkpoint.

pub mod aggregate;
pub mod cache;
pub mod engine;

pub use aggregate::{aggregate, FramePrediction, PerClass, Prediction, VideoPrediction};
pub use cache::ModelCache;
pub use engine::{
    decode_base64_image, BatchPrediction, CorpusEvaluation, EvaluationRow, ImageClassifier, ImagePrediction,
    InferenceEngine, InputKind,
};
