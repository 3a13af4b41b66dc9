//! Fitting the classifier to an extracted frame corpus.

pub mod augment;
pub mod corpus;
pub mod loader;
pub mod scheduler;
pub mod trainer;

use candle_core::Device;

use crate::config::TrainConfig;
use crate::error::Result;
use crate::label::Label;
use crate::metrics::ClassificationReport;
use crate::model::NetConfig;

pub use augment::Augmenter;
pub use corpus::{Corpus, Sample};
pub use loader::{Batch, BatchLoader};
pub use scheduler::{EarlyStopping, PlateauScheduler};
pub use trainer::{EpochStats, Termination, Trainer, TrainingOutcome, ValidationPass};

/// Result of a complete training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub outcome: TrainingOutcome,
    /// Validation metrics of the final weights
    pub final_stats: EpochStats,
    pub final_report: ClassificationReport,
    pub train_samples: usize,
    pub val_samples: usize,
}

/// Scan the corpus, split it, train and evaluate the final weights on the
/// validation partition.
pub fn run(config: &TrainConfig, net: NetConfig, device: &Device) -> Result<TrainingReport> {
    let corpus = Corpus::scan(&config.data_path, config.limit_samples)?;
    tracing::info!(
        total = corpus.len(),
        real = corpus.count(Label::Real),
        fake = corpus.count(Label::Fake),
        "Corpus loaded"
    );

    let (train_samples, val_samples) = corpus.split(config.val_split, config.seed);
    let (train_len, val_len) = (train_samples.len(), val_samples.len());
    tracing::info!(train = train_len, val = val_len, "Corpus split");

    let image_size = net.input_size;
    let train_loader = BatchLoader::new(train_samples, config.batch_size, image_size, config.num_workers, device)?
        .for_training(Augmenter::default(), config.seed);
    let val_loader = BatchLoader::new(val_samples, config.batch_size, image_size, config.num_workers, device)?;

    let mut trainer = Trainer::new(net, config, device)?;
    if let Some(resume) = &config.resume {
        trainer.resume_from(resume)?;
    }

    let outcome = trainer.fit(&train_loader, &val_loader)?;

    let pass = trainer.validate_epoch(&val_loader)?;
    let final_report = pass.report();
    tracing::info!(
        accuracy = final_report.accuracy,
        precision = final_report.precision,
        recall = final_report.recall,
        f1 = final_report.f1,
        "Final evaluation on validation set"
    );

    Ok(TrainingReport {
        outcome,
        final_stats: pass.stats,
        final_report,
        train_samples: train_len,
        val_samples: val_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::net::tiny_config;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn test_run_end_to_end() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("frames");
        for (label, value) in [("REAL", 30u8), ("FAKE", 220u8)] {
            std::fs::create_dir_all(data.join(label)).unwrap();
            for i in 0..5 {
                RgbImage::from_pixel(20, 20, Rgb([value, value, i * 10]))
                    .save(data.join(label).join(format!("v_frame_{:03}.jpg", i)))
                    .unwrap();
            }
        }

        let config = TrainConfig {
            data_path: data,
            epochs: 2,
            batch_size: 4,
            val_split: 0.3,
            checkpoint_path: dir.path().join("best.safetensors"),
            ..TrainConfig::default()
        };

        let report = run(&config, tiny_config(), &Device::Cpu).unwrap();
        assert_eq!(report.val_samples, 3);
        assert_eq!(report.train_samples, 7);
        assert_eq!(report.final_report.samples, 3);
        assert!(report.outcome.history.epochs() <= 2);
        assert!(config.checkpoint_path.exists());
    }

    #[test]
    fn test_run_without_images_fails() {
        let dir = tempdir().unwrap();
        let config = TrainConfig {
            data_path: dir.path().to_path_buf(),
            ..TrainConfig::default()
        };
        assert!(matches!(
            run(&config, tiny_config(), &Device::Cpu),
            Err(crate::error::DetectError::EmptyDataset(_))
        ));
    }
}
