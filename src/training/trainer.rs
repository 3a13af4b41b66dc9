//! The training loop as an explicit state machine.
//!
//! ```text
//! Idle -> TrainEpoch -> ValidateEpoch -> AdjustSchedule -> CheckpointDecision
//!              ^                                                  |
//!              +------------------- Continue ---------------------+
//!                                   EarlyStop | EpochLimitReached -> Done
//! ```

use candle_core::{Device, D};
use std::path::{Path, PathBuf};

use super::loader::{Batch, BatchLoader};
use super::scheduler::{EarlyStopping, PlateauScheduler};
use crate::config::TrainConfig;
use crate::error::{DetectError, Result};
use crate::label::Label;
use crate::metrics::ClassificationReport;
use crate::model::checkpoint::{self, Checkpoint, LoadMode};
use crate::model::{Adam, AdamParams, Classifier, EpochMetrics, NetConfig, TrainingHistory};

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Validation loss did not improve for `patience` epochs; `epoch` is the
    /// last epoch run.
    EarlyStop { epoch: usize },
    EpochLimitReached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub termination: Termination,
    /// 1-based epoch whose weights are in the best checkpoint
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub history: TrainingHistory,
    pub checkpoint_path: PathBuf,
}

/// Mean loss over batches and accuracy over samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    pub loss: f64,
    pub accuracy: f64,
}

/// A validation pass with the per-sample predictions behind it.
#[derive(Debug, Clone)]
pub struct ValidationPass {
    pub stats: EpochStats,
    pub predictions: Vec<Label>,
    pub labels: Vec<Label>,
}

impl ValidationPass {
    pub fn report(&self) -> ClassificationReport {
        ClassificationReport::from_pairs(self.labels.iter().copied().zip(self.predictions.iter().copied()))
    }
}

enum State {
    Idle,
    TrainEpoch { epoch: usize },
    ValidateEpoch { epoch: usize, train: EpochStats },
    AdjustSchedule { epoch: usize, train: EpochStats, val: EpochStats },
    CheckpointDecision { epoch: usize, val_loss: f64 },
    Done(Termination),
}

enum Verdict {
    Continue,
    EarlyStop,
    EpochLimitReached,
}

pub struct Trainer {
    classifier: Classifier,
    optimizer: Adam,
    scheduler: PlateauScheduler,
    early_stopping: EarlyStopping,
    history: TrainingHistory,
    epochs: usize,
    checkpoint_path: PathBuf,
}

impl Trainer {
    pub fn new(net: NetConfig, config: &TrainConfig, device: &Device) -> Result<Self> {
        let classifier = Classifier::new(net, device)?;
        let optimizer = Adam::new(
            classifier.named_vars()?,
            AdamParams {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..AdamParams::default()
            },
        )?;

        tracing::info!(parameters = classifier.parameter_count(), "Classifier initialized");

        Ok(Self {
            classifier,
            optimizer,
            scheduler: PlateauScheduler::new(config.lr_patience, config.lr_factor),
            early_stopping: EarlyStopping::new(config.early_stopping_patience),
            history: TrainingHistory::default(),
            epochs: config.epochs,
            checkpoint_path: config.checkpoint_path.clone(),
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Restore parameters, optimizer state and history from `path`.
    ///
    /// A missing or unreadable checkpoint is logged and ignored (returns
    /// `Ok(false)`); one that does not fit the model is an error. Training
    /// then continues from the epoch after the last recorded one.
    pub fn resume_from(&mut self, path: &Path) -> Result<bool> {
        let checkpoint = match Checkpoint::read(path, self.classifier.device()) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot resume from checkpoint, starting fresh");
                return Ok(false);
            }
        };

        checkpoint.restore_model(&self.classifier, LoadMode::Strict)?;
        checkpoint.restore_optimizer(&mut self.optimizer, LoadMode::Strict)?;
        self.history = checkpoint.history().clone();

        // Replay the recorded losses so both counters pick up where they were
        for &loss in &self.history.val_loss {
            self.scheduler.observe(loss);
            self.early_stopping.observe(loss);
        }

        tracing::info!(
            path = %path.display(),
            epochs = self.history.epochs(),
            lr = self.optimizer.learning_rate(),
            "Resumed from checkpoint"
        );
        Ok(true)
    }

    /// Run epochs until early stopping or the epoch budget ends the loop.
    /// Every strict improvement of the validation loss overwrites the best
    /// checkpoint.
    pub fn fit(&mut self, train: &BatchLoader, val: &BatchLoader) -> Result<TrainingOutcome> {
        if train.is_empty() {
            return Err(DetectError::Config("training partition is empty".to_string()));
        }
        if val.is_empty() {
            return Err(DetectError::Config(
                "validation partition is empty; raise val_split or add images".to_string(),
            ));
        }

        tracing::info!(
            epochs = self.epochs,
            train_samples = train.samples().len(),
            val_samples = val.samples().len(),
            "Starting training"
        );

        let mut state = State::Idle;
        let termination = loop {
            state = match state {
                State::Idle => {
                    let first = self.history.epochs() + 1;
                    if first > self.epochs {
                        State::Done(Termination::EpochLimitReached)
                    } else {
                        State::TrainEpoch { epoch: first }
                    }
                }
                State::TrainEpoch { epoch } => {
                    tracing::info!(epoch, epochs = self.epochs, "Epoch started");
                    let stats = self.train_epoch(train, epoch)?;
                    State::ValidateEpoch { epoch, train: stats }
                }
                State::ValidateEpoch { epoch, train } => {
                    let pass = self.validate_epoch(val)?;
                    State::AdjustSchedule {
                        epoch,
                        train,
                        val: pass.stats,
                    }
                }
                State::AdjustSchedule { epoch, train, val } => {
                    let lr = self.optimizer.learning_rate();
                    self.history.push(EpochMetrics {
                        train_loss: train.loss,
                        train_acc: train.accuracy,
                        val_loss: val.loss,
                        val_acc: val.accuracy,
                        learning_rate: lr,
                    });
                    tracing::info!(
                        epoch,
                        train_loss = train.loss,
                        train_acc = train.accuracy,
                        val_loss = val.loss,
                        val_acc = val.accuracy,
                        "Epoch finished"
                    );

                    let next_lr = self.scheduler.step(val.loss, lr);
                    if next_lr != lr {
                        tracing::info!(epoch, from = lr, to = next_lr, "Reducing learning rate");
                        self.optimizer.set_learning_rate(next_lr);
                    }
                    State::CheckpointDecision {
                        epoch,
                        val_loss: val.loss,
                    }
                }
                State::CheckpointDecision { epoch, val_loss } => match self.checkpoint_decision(epoch, val_loss)? {
                    Verdict::Continue => State::TrainEpoch { epoch: epoch + 1 },
                    Verdict::EarlyStop => State::Done(Termination::EarlyStop { epoch }),
                    Verdict::EpochLimitReached => State::Done(Termination::EpochLimitReached),
                },
                State::Done(termination) => break termination,
            };
        };

        match termination {
            Termination::EarlyStop { epoch } => tracing::info!(epoch, "Early stopping"),
            Termination::EpochLimitReached => tracing::info!(epochs = self.history.epochs(), "Epoch budget exhausted"),
        }
        if let (Some(epoch), Some(loss)) = (self.history.best_epoch, self.history.best_val_loss) {
            tracing::info!(best_epoch = epoch, best_val_loss = loss, "Training completed");
        }

        Ok(TrainingOutcome {
            termination,
            best_epoch: self.history.best_epoch,
            best_val_loss: self.history.best_val_loss,
            history: self.history.clone(),
            checkpoint_path: self.checkpoint_path.clone(),
        })
    }

    fn checkpoint_decision(&mut self, epoch: usize, val_loss: f64) -> Result<Verdict> {
        if self.early_stopping.observe(val_loss) {
            self.history.mark_best(epoch, val_loss);
            checkpoint::save(&self.checkpoint_path, &self.classifier, &self.optimizer, &self.history)?;
            tracing::info!(epoch, val_loss, path = %self.checkpoint_path.display(), "Model improved, checkpoint saved");
        } else {
            tracing::debug!(epoch, counter = self.early_stopping.counter(), "No improvement");
            if self.early_stopping.exhausted() {
                return Ok(Verdict::EarlyStop);
            }
        }

        if epoch >= self.epochs {
            Ok(Verdict::EpochLimitReached)
        } else {
            Ok(Verdict::Continue)
        }
    }

    /// One pass over the training partition with parameter updates.
    pub fn train_epoch(&mut self, loader: &BatchLoader, epoch: usize) -> Result<EpochStats> {
        let mut totals = Totals::default();
        for batch in loader.batches(epoch) {
            let batch = batch?;
            let logits = self.classifier.logits(&batch.images, true)?;
            let loss = candle_nn::loss::cross_entropy(&logits, &batch.labels)?;
            self.optimizer.backward_step(&loss)?;

            let predicted = argmax(&logits)?;
            totals.add(loss.to_scalar::<f32>()? as f64, &predicted, &batch);
        }
        Ok(totals.stats())
    }

    /// One pass over `loader` without updates.
    pub fn validate_epoch(&self, loader: &BatchLoader) -> Result<ValidationPass> {
        let mut totals = Totals::default();
        let mut predictions = Vec::with_capacity(loader.samples().len());
        let mut labels = Vec::with_capacity(loader.samples().len());

        for batch in loader.batches(0) {
            let batch = batch?;
            let logits = self.classifier.logits(&batch.images, false)?;
            let loss = candle_nn::loss::cross_entropy(&logits, &batch.labels)?;

            let predicted = argmax(&logits)?;
            totals.add(loss.to_scalar::<f32>()? as f64, &predicted, &batch);
            predictions.extend(predicted.iter().filter_map(|&p| Label::from_index(p as usize)));
            labels.extend(batch.label_values.iter().filter_map(|&l| Label::from_index(l as usize)));
        }

        Ok(ValidationPass {
            stats: totals.stats(),
            predictions,
            labels,
        })
    }
}

fn argmax(logits: &candle_core::Tensor) -> Result<Vec<u32>> {
    Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
}

#[derive(Default)]
struct Totals {
    loss_sum: f64,
    batches: usize,
    correct: usize,
    samples: usize,
}

impl Totals {
    fn add(&mut self, loss: f64, predicted: &[u32], batch: &Batch) {
        self.loss_sum += loss;
        self.batches += 1;
        self.correct += predicted
            .iter()
            .zip(&batch.label_values)
            .filter(|(p, l)| p == l)
            .count();
        self.samples += batch.len();
    }

    fn stats(&self) -> EpochStats {
        EpochStats {
            loss: if self.batches > 0 {
                self.loss_sum / self.batches as f64
            } else {
                f64::NAN
            },
            accuracy: if self.samples > 0 {
                self.correct as f64 / self.samples as f64
            } else {
                0.0
            },
        }
    }
}
