use serde::{Deserialize, Serialize};

/// Metrics of one completed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
    /// Learning rate the epoch was trained with
    pub learning_rate: f64,
}

/// Per-epoch series of a training run. Epoch `i` (1-based) is stored at
/// index `i - 1` of every series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub train_acc: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_acc: Vec<f64>,
    pub learning_rates: Vec<f64>,
    /// 1-based epoch of the lowest validation loss
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.train_loss.push(metrics.train_loss);
        self.train_acc.push(metrics.train_acc);
        self.val_loss.push(metrics.val_loss);
        self.val_acc.push(metrics.val_acc);
        self.learning_rates.push(metrics.learning_rate);
    }

    pub fn mark_best(&mut self, epoch: usize, val_loss: f64) {
        self.best_epoch = Some(epoch);
        self.best_val_loss = Some(val_loss);
    }

    /// Number of completed epochs.
    pub fn epochs(&self) -> usize {
        self.val_loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.val_loss.is_empty()
    }

    /// Smallest validation loss recorded, if any.
    pub fn min_val_loss(&self) -> Option<f64> {
        self.val_loss.iter().copied().reduce(f64::min)
    }

    pub fn last(&self) -> Option<EpochMetrics> {
        let i = self.epochs().checked_sub(1)?;
        Some(EpochMetrics {
            train_loss: *self.train_loss.get(i)?,
            train_acc: *self.train_acc.get(i)?,
            val_loss: self.val_loss[i],
            val_acc: *self.val_acc.get(i)?,
            learning_rate: *self.learning_rates.get(i)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(val_loss: f64) -> EpochMetrics {
        EpochMetrics {
            train_loss: 0.5,
            train_acc: 0.7,
            val_loss,
            val_acc: 0.6,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_history_series_stay_aligned() {
        let mut history = TrainingHistory::default();
        assert!(history.last().is_none());
        assert_eq!(history.min_val_loss(), None);

        history.push(metrics(0.7));
        history.push(metrics(0.4));
        history.push(metrics(0.55));

        assert_eq!(history.epochs(), 3);
        assert_eq!(history.min_val_loss(), Some(0.4));
        assert_eq!(history.last().unwrap().val_loss, 0.55);
        assert_eq!(history.learning_rates.len(), 3);
    }
}
