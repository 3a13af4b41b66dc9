use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

use crate::discovery::{discover_files, IMAGE_EXTENSIONS};
use crate::error::{DetectError, Result};
use crate::label::Label;

/// One labeled image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: Label,
}

/// The labeled images below a `REAL/` + `FAKE/` root.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    samples: Vec<Sample>,
}

impl Corpus {
    /// Collect `REAL/` then `FAKE/` images, each sorted by path and capped at
    /// `limit_per_class` when given.
    pub fn scan(root: &Path, limit_per_class: Option<usize>) -> Result<Self> {
        let mut samples = Vec::new();

        for label in Label::ALL {
            let dir = root.join(label.dir_name());
            if !dir.is_dir() {
                tracing::warn!(directory = %dir.display(), "Class directory not found");
                continue;
            }

            let mut files = discover_files(&dir, IMAGE_EXTENSIONS, false);
            if let Some(limit) = limit_per_class {
                files.truncate(limit);
            }
            tracing::info!(label = %label, images = files.len(), "Loaded class");
            samples.extend(files.into_iter().map(|path| Sample { path, label }));
        }

        if samples.is_empty() {
            return Err(DetectError::EmptyDataset(root.to_path_buf()));
        }

        Ok(Self { samples })
    }

    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn count(&self, label: Label) -> usize {
        self.samples.iter().filter(|s| s.label == label).count()
    }

    /// Shuffle with `seed` and split off `floor(len * val_fraction)` samples
    /// for validation. Returns `(train, val)`.
    pub fn split(&self, val_fraction: f32, seed: u64) -> (Vec<Sample>, Vec<Sample>) {
        let mut shuffled = self.samples.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

        let val_len = ((shuffled.len() as f64) * val_fraction.clamp(0.0, 1.0) as f64).floor() as usize;
        let train = shuffled.split_off(val_len);
        (train, shuffled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn corpus_dir(real: usize, fake: usize) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        for (label, n) in [("REAL", real), ("FAKE", fake)] {
            fs::create_dir_all(dir.path().join(label)).unwrap();
            for i in 0..n {
                File::create(dir.path().join(label).join(format!("v{}_frame_{:03}.jpg", i % 3, i))).unwrap();
            }
        }
        File::create(dir.path().join("REAL").join("notes.txt")).unwrap();
        dir
    }

    #[test]
    fn test_scan_orders_real_then_fake() {
        let dir = corpus_dir(4, 3);
        let corpus = Corpus::scan(dir.path(), None).unwrap();
        assert_eq!(corpus.len(), 7);
        assert_eq!(corpus.count(Label::Real), 4);
        assert!(corpus.samples()[..4].iter().all(|s| s.label == Label::Real));
        assert!(corpus.samples()[4..].iter().all(|s| s.label == Label::Fake));
    }

    #[test]
    fn test_limit_per_class() {
        let dir = corpus_dir(10, 2);
        let corpus = Corpus::scan(dir.path(), Some(3)).unwrap();
        assert_eq!(corpus.count(Label::Real), 3);
        assert_eq!(corpus.count(Label::Fake), 2);
    }

    #[test]
    fn test_empty_corpus() {
        let dir = tempdir().unwrap();
        assert!(matches!(Corpus::scan(dir.path(), None), Err(DetectError::EmptyDataset(_))));
    }

    #[test]
    fn test_split_is_seeded_and_complete() {
        let dir = corpus_dir(6, 5);
        let corpus = Corpus::scan(dir.path(), None).unwrap();

        let (train, val) = corpus.split(0.2, 7);
        assert_eq!(val.len(), 2);
        assert_eq!(train.len(), 9);

        let (train_again, val_again) = corpus.split(0.2, 7);
        assert_eq!(train, train_again);
        assert_eq!(val, val_again);

        let mut all: Vec<PathBuf> = train.iter().chain(val.iter()).map(|s| s.path.clone()).collect();
        all.sort();
        let mut expected: Vec<PathBuf> = corpus.samples().iter().map(|s| s.path.clone()).collect();
        expected.sort();
        assert_eq!(all, expected);
    }
}
