//! Keeps one loaded model around between requests.

use candle_core::Device;
use std::path::Path;

use super::engine::InferenceEngine;
use crate::error::{DetectError, Result};

/// Lazily loads a checkpoint and reuses it until a different path is asked for.
pub struct ModelCache {
    device: Device,
    loaded: Option<InferenceEngine>,
    loads: usize,
}

impl ModelCache {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            loaded: None,
            loads: 0,
        }
    }

    /// Engine for `path`, loading it on first use or when the path changes.
    ///
    /// A failed load leaves the cache empty.
    pub fn get(&mut self, path: &Path) -> Result<&InferenceEngine> {
        let hit = matches!(&self.loaded, Some(engine) if engine.source() == Some(path));

        if !hit {
            if let Some(previous) = self.loaded.take() {
                tracing::info!(
                    previous = ?previous.source(),
                    next = %path.display(),
                    "Checkpoint changed, reloading model"
                );
            }
            let engine = InferenceEngine::from_checkpoint(path, &self.device)?;
            self.loads += 1;
            self.loaded = Some(engine);
        }

        self.loaded
            .as_ref()
            .ok_or_else(|| DetectError::Config("model cache is empty".to_string()))
    }

    pub fn invalidate(&mut self) {
        self.loaded = None;
    }

    pub fn loaded_path(&self) -> Option<&Path> {
        self.loaded.as_ref().and_then(|engine| engine.source())
    }

    /// Number of checkpoint loads performed so far.
    pub fn loads(&self) -> usize {
        self.loads
    }
}
