//! Validation-loss driven control: learning-rate plateau reduction and early
//! stopping. The two keep independent counters.

/// Relative improvement a loss must show to count as better.
const PLATEAU_THRESHOLD: f64 = 1e-4;

/// Smallest learning-rate change that is applied.
const LR_EPSILON: f64 = 1e-8;

/// Reduce the learning rate when the validation loss stops improving.
///
/// An epoch is "bad" unless its loss is below `best * (1 - 1e-4)`. Once more
/// than `patience` bad epochs accumulate, the rate is multiplied by `factor`
/// and the count starts over.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateauScheduler {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    pub fn new(patience: usize, factor: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr: 0.0,
            best: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    /// Record `loss` and report whether a reduction is due.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best * (1.0 - PLATEAU_THRESHOLD) {
            self.best = loss;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }

        if self.bad_epochs > self.patience {
            self.bad_epochs = 0;
            true
        } else {
            false
        }
    }

    /// Record `loss` and return the learning rate to use next.
    pub fn step(&mut self, loss: f64, lr: f64) -> f64 {
        if !self.observe(loss) {
            return lr;
        }

        let reduced = (lr * self.factor).max(self.min_lr);
        if lr - reduced > LR_EPSILON {
            reduced
        } else {
            lr
        }
    }

    pub fn bad_epochs(&self) -> usize {
        self.bad_epochs
    }
}

/// Tracks the best validation loss and how long it has gone unimproved.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    counter: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            counter: 0,
        }
    }

    /// Record `loss`; returns `true` on a strict improvement, which resets
    /// the counter.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best {
            self.best = loss;
            self.counter = 0;
            true
        } else {
            self.counter += 1;
            false
        }
    }

    /// Whether the unimproved streak has reached the patience limit.
    pub fn exhausted(&self) -> bool {
        self.counter > 0 && self.counter >= self.patience
    }

    pub fn best(&self) -> Option<f64> {
        self.best.is_finite().then_some(self.best)
    }

    pub fn counter(&self) -> usize {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lr_halves_after_patience_exceeded() {
        let mut scheduler = PlateauScheduler::new(3, 0.5);
        let mut lr = 1e-3;

        lr = scheduler.step(1.0, lr);
        assert_eq!(lr, 1e-3);

        // three bad epochs are tolerated
        for _ in 0..3 {
            lr = scheduler.step(1.0, lr);
            assert_eq!(lr, 1e-3);
        }

        // the fourth triggers a reduction and resets the count
        lr = scheduler.step(1.0, lr);
        assert_eq!(lr, 5e-4);
        assert_eq!(scheduler.bad_epochs(), 0);
    }

    #[test]
    fn test_tiny_improvement_is_not_progress() {
        let mut scheduler = PlateauScheduler::new(0, 0.5);
        assert!(!scheduler.observe(1.0));
        // within the relative threshold
        assert!(scheduler.observe(0.99995));
        assert!(!scheduler.observe(0.9));
    }

    #[test]
    fn test_early_stopping_counter() {
        let mut stopping = EarlyStopping::new(2);
        assert!(stopping.observe(0.8));
        assert!(!stopping.observe(0.8));
        assert!(!stopping.exhausted());
        assert!(stopping.observe(0.7));
        assert_eq!(stopping.counter(), 0);
        assert!(!stopping.observe(0.75));
        assert!(!stopping.observe(0.9));
        assert!(stopping.exhausted());
        assert_eq!(stopping.best(), Some(0.7));
    }

    #[test]
    fn test_nan_loss_never_improves() {
        let mut stopping = EarlyStopping::new(1);
        assert!(!stopping.observe(f64::NAN));
        assert!(stopping.exhausted());
        assert_eq!(stopping.best(), None);
    }
}
