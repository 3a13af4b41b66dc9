//! Checkpoint files.
//!
//! A checkpoint is a single safetensors file with three sections:
//! - `model.<var>`: classifier parameters
//! - `optimizer.m.<var>`, `optimizer.v.<var>`, `optimizer.step`: Adam state
//! - metadata: format version, save time, network shape, optimizer
//!   hyper-parameters and the training history (JSON strings)

use candle_core::{Device, Tensor};
use chrono::{DateTime, Utc};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use super::history::TrainingHistory;
use super::net::{Classifier, NetConfig};
use super::optimizer::{Adam, AdamParams};
use crate::error::{DetectError, Result};

pub const FORMAT_VERSION: u32 = 1;

const MODEL_PREFIX: &str = "model.";
const FIRST_MOMENT_PREFIX: &str = "optimizer.m.";
const SECOND_MOMENT_PREFIX: &str = "optimizer.v.";
const STEP_KEY: &str = "optimizer.step";

/// How to treat a checkpoint that does not match the current model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Any missing, unexpected or mis-shaped tensor is an error and nothing
    /// is loaded.
    #[default]
    Strict,
    /// Load what matches; skip the rest with a warning.
    Relaxed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub format: u32,
    pub saved_at: DateTime<Utc>,
    pub net: NetConfig,
    pub optimizer: AdamParams,
    pub history: TrainingHistory,
}

/// Tensors restored and skipped by a load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: Vec<String>,
}

/// Write a full snapshot of the model state to `path`.
///
/// The file is written next to `path` and renamed over it, so readers never
/// observe a partial checkpoint.
pub fn save(path: &Path, classifier: &Classifier, optimizer: &Adam, history: &TrainingHistory) -> Result<()> {
    let cpu = Device::Cpu;
    let mut tensors: Vec<(String, Tensor)> = Vec::new();

    for (name, var) in classifier.named_vars()? {
        tensors.push((format!("{MODEL_PREFIX}{name}"), var.as_tensor().to_device(&cpu)?));
    }
    for (name, m, v) in optimizer.moments() {
        tensors.push((format!("{FIRST_MOMENT_PREFIX}{name}"), m.to_device(&cpu)?));
        tensors.push((format!("{SECOND_MOMENT_PREFIX}{name}"), v.to_device(&cpu)?));
    }
    tensors.push((
        STEP_KEY.to_string(),
        Tensor::new(&[optimizer.step_count() as i64], &cpu)?,
    ));

    let meta = CheckpointMeta {
        format: FORMAT_VERSION,
        saved_at: Utc::now(),
        net: classifier.config().clone(),
        optimizer: *optimizer.params(),
        history: history.clone(),
    };
    let metadata = encode_meta(&meta)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    safetensors::tensor::serialize_to_file(
        tensors.iter().map(|(k, t)| (k.as_str(), t)),
        &Some(metadata),
        &tmp,
    )
    .map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        DetectError::Io(std::io::Error::other(format!("failed to write checkpoint: {}", e)))
    })?;
    std::fs::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), tensors = tensors.len(), "Checkpoint saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "checkpoint".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn encode_meta(meta: &CheckpointMeta) -> Result<HashMap<String, String>> {
    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), meta.format.to_string());
    metadata.insert("saved_at".to_string(), meta.saved_at.to_rfc3339());
    metadata.insert("net".to_string(), serde_json::to_string(&meta.net)?);
    metadata.insert("optimizer".to_string(), serde_json::to_string(&meta.optimizer)?);
    metadata.insert("history".to_string(), serde_json::to_string(&meta.history)?);
    Ok(metadata)
}

fn decode_meta(metadata: &HashMap<String, String>) -> std::result::Result<CheckpointMeta, String> {
    let field = |key: &str| {
        metadata
            .get(key)
            .ok_or_else(|| format!("metadata field '{}' is missing", key))
    };

    let format: u32 = field("format")?
        .parse()
        .map_err(|_| "metadata field 'format' is not a number".to_string())?;
    if format != FORMAT_VERSION {
        return Err(format!("unsupported checkpoint format {}", format));
    }

    let saved_at = DateTime::parse_from_rfc3339(field("saved_at")?)
        .map_err(|e| format!("bad save time: {}", e))?
        .with_timezone(&Utc);
    let net = serde_json::from_str(field("net")?).map_err(|e| format!("bad network config: {}", e))?;
    let optimizer =
        serde_json::from_str(field("optimizer")?).map_err(|e| format!("bad optimizer config: {}", e))?;
    let history = serde_json::from_str(field("history")?).map_err(|e| format!("bad history: {}", e))?;

    Ok(CheckpointMeta {
        format,
        saved_at,
        net,
        optimizer,
        history,
    })
}

/// A checkpoint read into memory.
pub struct Checkpoint {
    path: PathBuf,
    meta: CheckpointMeta,
    tensors: HashMap<String, Tensor>,
}

impl Checkpoint {
    /// Read and validate a checkpoint. A missing, truncated or foreign file
    /// is reported as `CheckpointCorrupt`.
    pub fn read(path: &Path, device: &Device) -> Result<Self> {
        let corrupt = |reason: String| DetectError::corrupt_checkpoint(path, reason);

        let buffer = std::fs::read(path).map_err(|e| corrupt(e.to_string()))?;
        let (_, header) = SafeTensors::read_metadata(&buffer).map_err(|e| corrupt(e.to_string()))?;
        let metadata = header
            .metadata()
            .as_ref()
            .ok_or_else(|| corrupt("no metadata".to_string()))?;
        let meta = decode_meta(metadata).map_err(corrupt)?;

        let tensors =
            candle_core::safetensors::load_buffer(&buffer, device).map_err(|e| corrupt(e.to_string()))?;

        tracing::debug!(path = %path.display(), tensors = tensors.len(), "Checkpoint read");
        Ok(Self {
            path: path.to_path_buf(),
            meta,
            tensors,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &CheckpointMeta {
        &self.meta
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.meta.history
    }

    /// Build a classifier with the stored network shape and load its weights.
    pub fn build_classifier(&self, device: &Device, mode: LoadMode) -> Result<Classifier> {
        let classifier = Classifier::new(self.meta.net.clone(), device)?;
        self.restore_model(&classifier, mode)?;
        Ok(classifier)
    }

    /// Copy the `model.*` tensors into `classifier`.
    pub fn restore_model(&self, classifier: &Classifier, mode: LoadMode) -> Result<LoadReport> {
        let vars = classifier.named_vars()?;
        let mut report = LoadReport::default();
        let mut assignments = Vec::with_capacity(vars.len());

        for (name, var) in &vars {
            let key = format!("{MODEL_PREFIX}{name}");
            match self.tensors.get(&key) {
                None => {
                    skip_or_fail(mode, &mut report, DetectError::CheckpointMissingKey(key))?;
                }
                Some(t) if t.dims() != var.dims() => {
                    let err = DetectError::CheckpointShapeMismatch {
                        key,
                        expected: var.dims().to_vec(),
                        found: t.dims().to_vec(),
                    };
                    skip_or_fail(mode, &mut report, err)?;
                }
                Some(t) => assignments.push((var, t)),
            }
        }

        let known: HashSet<String> = vars.iter().map(|(n, _)| format!("{MODEL_PREFIX}{n}")).collect();
        let mut unexpected: Vec<&String> = self
            .tensors
            .keys()
            .filter(|k| k.starts_with(MODEL_PREFIX) && !known.contains(*k))
            .collect();
        unexpected.sort();
        for key in unexpected {
            skip_or_fail(mode, &mut report, DetectError::CheckpointUnexpectedKey(key.clone()))?;
        }

        for (var, tensor) in assignments {
            let tensor = tensor.to_dtype(var.dtype())?.to_device(var.device())?;
            var.set(&tensor)?;
            report.loaded += 1;
        }

        tracing::debug!(
            path = %self.path.display(),
            loaded = report.loaded,
            skipped = report.skipped.len(),
            "Model parameters restored"
        );
        Ok(report)
    }

    /// Restore Adam moments, step count and hyper-parameters.
    pub fn restore_optimizer(&self, optimizer: &mut Adam, mode: LoadMode) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        match self.tensors.get(STEP_KEY) {
            Some(step) => {
                let step = step.flatten_all()?.to_dtype(candle_core::DType::I64)?.to_vec1::<i64>()?;
                optimizer.set_step_count(step.first().copied().unwrap_or(0).max(0) as u64);
            }
            None => skip_or_fail(mode, &mut report, DetectError::CheckpointMissingKey(STEP_KEY.to_string()))?,
        }

        let current: Vec<(String, Vec<usize>)> = optimizer
            .moments()
            .map(|(name, m, _)| (name.to_string(), m.dims().to_vec()))
            .collect();

        let mut assignments = Vec::with_capacity(current.len());
        for (name, dims) in &current {
            let mut pair = Vec::with_capacity(2);
            for prefix in [FIRST_MOMENT_PREFIX, SECOND_MOMENT_PREFIX] {
                let key = format!("{prefix}{name}");
                match self.tensors.get(&key) {
                    None => skip_or_fail(mode, &mut report, DetectError::CheckpointMissingKey(key))?,
                    Some(t) if t.dims() != dims.as_slice() => {
                        let err = DetectError::CheckpointShapeMismatch {
                            key,
                            expected: dims.clone(),
                            found: t.dims().to_vec(),
                        };
                        skip_or_fail(mode, &mut report, err)?;
                    }
                    Some(t) => pair.push(t),
                }
            }
            if let [m, v] = pair.as_slice() {
                assignments.push((name, *m, *v));
            }
        }

        for (name, m, v) in assignments {
            if optimizer.set_moments(name, m, v)? {
                report.loaded += 2;
            }
        }

        let lr = self.meta.optimizer.lr;
        optimizer.set_params(self.meta.optimizer);
        tracing::debug!(step = optimizer.step_count(), lr, "Optimizer state restored");
        Ok(report)
    }

    pub fn summary(&self) -> CheckpointSummary {
        let mut params_by_module: BTreeMap<String, usize> = BTreeMap::new();
        let mut model_tensors = 0;
        let mut optimizer_tensors = 0;

        for (key, tensor) in &self.tensors {
            if let Some(name) = key.strip_prefix(MODEL_PREFIX) {
                model_tensors += 1;
                let module = name.split('.').next().unwrap_or(name).to_string();
                *params_by_module.entry(module).or_default() += tensor.elem_count();
            } else if key.starts_with("optimizer.") {
                optimizer_tensors += 1;
            }
        }

        let optimizer_step = self
            .tensors
            .get(STEP_KEY)
            .and_then(|t| t.flatten_all().ok())
            .and_then(|t| t.to_vec1::<i64>().ok())
            .and_then(|v| v.first().copied())
            .map(|s| s.max(0) as u64);

        CheckpointSummary {
            path: self.path.clone(),
            format: self.meta.format,
            saved_at: self.meta.saved_at,
            net: self.meta.net.clone(),
            total_params: params_by_module.values().sum(),
            params_by_module,
            model_tensors,
            optimizer_tensors,
            optimizer_step,
            learning_rate: self.meta.optimizer.lr,
            epochs: self.meta.history.epochs(),
            best_epoch: self.meta.history.best_epoch,
            best_val_loss: self.meta.history.best_val_loss,
        }
    }
}

fn skip_or_fail(mode: LoadMode, report: &mut LoadReport, err: DetectError) -> Result<()> {
    match mode {
        LoadMode::Strict => Err(err),
        LoadMode::Relaxed => {
            tracing::warn!(error = %err, "Skipping checkpoint tensor");
            let key = match &err {
                DetectError::CheckpointMissingKey(k) | DetectError::CheckpointUnexpectedKey(k) => k.clone(),
                DetectError::CheckpointShapeMismatch { key, .. } => key.clone(),
                other => other.to_string(),
            };
            report.skipped.push(key);
            Ok(())
        }
    }
}

/// Human-readable overview of a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSummary {
    pub path: PathBuf,
    pub format: u32,
    pub saved_at: DateTime<Utc>,
    pub net: NetConfig,
    pub total_params: usize,
    pub params_by_module: BTreeMap<String, usize>,
    pub model_tensors: usize,
    pub optimizer_tensors: usize,
    pub optimizer_step: Option<u64>,
    pub learning_rate: f64,
    pub epochs: usize,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
}

impl fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checkpoint: {}", self.path.display())?;
        writeln!(f, "  Format:        v{}", self.format)?;
        writeln!(f, "  Saved:         {}", self.saved_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(
            f,
            "  Network:       input {}px, channels {:?}, hidden {}",
            self.net.input_size, self.net.channels, self.net.hidden
        )?;
        writeln!(f, "  Parameters:    {} in {} tensors", self.total_params, self.model_tensors)?;
        for (module, count) in &self.params_by_module {
            writeln!(f, "    {:<12} {}", module, count)?;
        }
        match self.optimizer_step {
            Some(step) => writeln!(
                f,
                "  Optimizer:     {} tensors, step {}, lr {:e}",
                self.optimizer_tensors, step, self.learning_rate
            )?,
            None => writeln!(f, "  Optimizer:     none")?,
        }
        write!(f, "  Epochs run:    {}", self.epochs)?;
        if let (Some(epoch), Some(loss)) = (self.best_epoch, self.best_val_loss) {
            write!(f, "\n  Best epoch:    {} (val loss {:.4})", epoch, loss)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::history::EpochMetrics;
    use crate::model::net::tiny_config;
    use candle_core::DType;
    use tempfile::tempdir;

    fn trained_state() -> (Classifier, Adam, TrainingHistory) {
        let device = Device::Cpu;
        let classifier = Classifier::new(tiny_config(), &device).unwrap();
        let mut adam = Adam::new(
            classifier.named_vars().unwrap(),
            AdamParams { lr: 0.01, weight_decay: 1e-5, ..AdamParams::default() },
        )
        .unwrap();

        let xs = Tensor::randn(0f32, 1f32, (4, 3, 16, 16), &device).unwrap();
        let ys = Tensor::new(&[0u32, 1, 1, 0], &device).unwrap();
        for _ in 0..2 {
            let logits = classifier.logits(&xs, true).unwrap();
            let loss = candle_nn::loss::cross_entropy(&logits, &ys).unwrap();
            adam.backward_step(&loss).unwrap();
        }

        let mut history = TrainingHistory::default();
        history.push(EpochMetrics {
            train_loss: 0.69,
            train_acc: 0.5,
            val_loss: 0.68,
            val_acc: 0.5,
            learning_rate: 0.01,
        });
        history.mark_best(1, 0.68);
        (classifier, adam, history)
    }

    fn values(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_dtype(DType::F32).unwrap().to_vec1().unwrap()
    }

    #[test]
    fn test_round_trip_restores_parameters_and_optimizer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("best_model.safetensors");
        let (classifier, adam, history) = trained_state();
        save(&path, &classifier, &adam, &history).unwrap();
        assert!(!temp_path(&path).exists());

        let checkpoint = Checkpoint::read(&path, &Device::Cpu).unwrap();
        assert_eq!(checkpoint.history(), &history);
        assert_eq!(checkpoint.meta().net, tiny_config());

        let fresh = Classifier::new(tiny_config(), &Device::Cpu).unwrap();
        let report = checkpoint.restore_model(&fresh, LoadMode::Strict).unwrap();
        assert_eq!(report.loaded, 8);
        assert!(report.skipped.is_empty());

        for ((name_a, a), (name_b, b)) in classifier.named_vars().unwrap().iter().zip(fresh.named_vars().unwrap().iter()) {
            assert_eq!(name_a, name_b);
            assert_eq!(values(a.as_tensor()), values(b.as_tensor()));
        }

        let mut fresh_adam = Adam::new(fresh.named_vars().unwrap(), AdamParams::default()).unwrap();
        checkpoint.restore_optimizer(&mut fresh_adam, LoadMode::Strict).unwrap();
        assert_eq!(fresh_adam.step_count(), 2);
        assert_eq!(fresh_adam.params(), adam.params());
        for ((_, m1, v1), (_, m2, v2)) in adam.moments().zip(fresh_adam.moments()) {
            assert_eq!(values(m1), values(m2));
            assert_eq!(values(v1), values(v2));
        }
    }

    #[test]
    fn test_strict_load_rejects_shape_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let (classifier, adam, history) = trained_state();
        save(&path, &classifier, &adam, &history).unwrap();

        let wider = NetConfig { hidden: 16, ..tiny_config() };
        let other = Classifier::new(wider, &Device::Cpu).unwrap();
        let before = values(other.named_vars().unwrap()[0].1.as_tensor());

        let checkpoint = Checkpoint::read(&path, &Device::Cpu).unwrap();
        let err = checkpoint.restore_model(&other, LoadMode::Strict).unwrap_err();
        assert!(matches!(err, DetectError::CheckpointShapeMismatch { .. }));
        assert!(!err.is_recoverable());

        // nothing was loaded
        assert_eq!(values(other.named_vars().unwrap()[0].1.as_tensor()), before);
    }

    #[test]
    fn test_relaxed_load_skips_mismatches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let (classifier, adam, history) = trained_state();
        save(&path, &classifier, &adam, &history).unwrap();

        let deeper = NetConfig { channels: vec![4, 8, 8], ..tiny_config() };
        let other = Classifier::new(deeper, &Device::Cpu).unwrap();
        let checkpoint = Checkpoint::read(&path, &Device::Cpu).unwrap();

        assert!(matches!(
            checkpoint.restore_model(&other, LoadMode::Strict),
            Err(DetectError::CheckpointMissingKey(_))
        ));

        let report = checkpoint.restore_model(&other, LoadMode::Relaxed).unwrap();
        // only the extra conv stage is absent from the file
        assert_eq!(report.loaded, 8);
        assert_eq!(
            report.skipped,
            vec!["model.features.2.bias".to_string(), "model.features.2.weight".to_string()]
        );
    }

    #[test]
    fn test_strict_load_rejects_unexpected_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let deeper = Classifier::new(NetConfig { channels: vec![4, 8, 8], ..tiny_config() }, &Device::Cpu).unwrap();
        let adam = Adam::new(deeper.named_vars().unwrap(), AdamParams::default()).unwrap();
        save(&path, &deeper, &adam, &TrainingHistory::default()).unwrap();

        let shallow = Classifier::new(tiny_config(), &Device::Cpu).unwrap();
        let checkpoint = Checkpoint::read(&path, &Device::Cpu).unwrap();
        assert!(matches!(
            checkpoint.restore_model(&shallow, LoadMode::Strict),
            Err(DetectError::CheckpointUnexpectedKey(k)) if k == "model.features.2.bias"
        ));
    }

    #[test]
    fn test_corrupt_and_missing_files() {
        let dir = tempdir().unwrap();
        let garbage = dir.path().join("garbage.safetensors");
        std::fs::write(&garbage, b"definitely not a checkpoint").unwrap();

        assert!(matches!(
            Checkpoint::read(&garbage, &Device::Cpu),
            Err(DetectError::CheckpointCorrupt { .. })
        ));
        assert!(matches!(
            Checkpoint::read(&dir.path().join("missing.safetensors"), &Device::Cpu),
            Err(DetectError::CheckpointCorrupt { .. })
        ));
    }

    #[test]
    fn test_summary_groups_parameters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let (classifier, adam, history) = trained_state();
        save(&path, &classifier, &adam, &history).unwrap();

        let summary = Checkpoint::read(&path, &Device::Cpu).unwrap().summary();
        assert_eq!(summary.total_params, classifier.parameter_count());
        assert_eq!(summary.params_by_module.get("features"), Some(&(112 + 296)));
        assert_eq!(summary.params_by_module.get("classifier"), Some(&(72 + 18)));
        assert_eq!(summary.model_tensors, 8);
        assert_eq!(summary.optimizer_tensors, 17);
        assert_eq!(summary.optimizer_step, Some(2));
        assert_eq!(summary.best_epoch, Some(1));
        assert!(summary.to_string().contains("Best epoch:    1"));
    }
}
