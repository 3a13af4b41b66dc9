//! Classifier network, optimizer and checkpoint persistence.

pub mod checkpoint;
pub mod history;
pub mod net;
pub mod optimizer;
pub mod preprocess;

use candle_core::Device;

pub use checkpoint::{Checkpoint, CheckpointSummary, LoadMode};
pub use history::{EpochMetrics, TrainingHistory};
pub use net::{Classifier, DeepfakeNet, NetConfig, NUM_CLASSES};
pub use optimizer::{Adam, AdamParams};

/// First CUDA device when built with `cuda` and one is present, else CPU.
pub fn default_device() -> Device {
    match Device::cuda_if_available(0) {
        Ok(device) => device,
        Err(e) => {
            tracing::warn!(error = %e, "CUDA device unavailable, using CPU");
            Device::Cpu
        }
    }
}
