//! Mini-batch loading.
//!
//! Images are decoded, resized, optionally augmented and normalized either on
//! the calling thread or on a dedicated rayon pool. Batch contents depend only
//! on the sample order and the seed, never on the number of workers.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;

use super::augment::{sample_rng, Augmenter};
use super::corpus::Sample;
use crate::error::{DetectError, Result};
use crate::model::preprocess;

/// A decoded mini-batch.
pub struct Batch {
    /// (N, 3, size, size) normalized images
    pub images: Tensor,
    /// (N,) class indices
    pub labels: Tensor,
    pub label_values: Vec<u32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.label_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_values.is_empty()
    }
}

pub struct BatchLoader {
    samples: Vec<Sample>,
    batch_size: usize,
    image_size: usize,
    shuffle: bool,
    augmenter: Option<Augmenter>,
    seed: u64,
    pool: Option<ThreadPool>,
    device: Device,
}

impl BatchLoader {
    /// Sequential, unaugmented loader. `num_workers == 0` decodes on the
    /// calling thread.
    pub fn new(
        samples: Vec<Sample>,
        batch_size: usize,
        image_size: usize,
        num_workers: usize,
        device: &Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(DetectError::Config("batch size must be at least 1".to_string()));
        }

        let pool = if num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .thread_name(|i| format!("loader-{}", i))
                .build()
                .map_err(|e| DetectError::Config(format!("failed to start loader threads: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            samples,
            batch_size,
            image_size,
            shuffle: false,
            augmenter: None,
            seed: 0,
            pool,
            device: device.clone(),
        })
    }

    /// Reshuffle every epoch and augment each sample, both derived from `seed`.
    pub fn for_training(mut self, augmenter: Augmenter, seed: u64) -> Self {
        self.shuffle = true;
        self.augmenter = Some(augmenter);
        self.seed = seed;
        self
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample indices in the order they are served in `epoch`.
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Batches of `epoch`, decoded lazily.
    pub fn batches(&self, epoch: usize) -> impl Iterator<Item = Result<Batch>> + '_ {
        let order = self.order(epoch);
        let chunks: Vec<Vec<usize>> = order.chunks(self.batch_size).map(|c| c.to_vec()).collect();
        chunks.into_iter().map(move |chunk| self.load_batch(&chunk, epoch))
    }

    fn load_batch(&self, indices: &[usize], epoch: usize) -> Result<Batch> {
        let images: Vec<Vec<f32>> = match &self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| self.load_sample(i, epoch))
                    .collect::<Result<Vec<_>>>()
            })?,
            None => indices
                .iter()
                .map(|&i| self.load_sample(i, epoch))
                .collect::<Result<Vec<_>>>()?,
        };

        let label_values: Vec<u32> = indices.iter().map(|&i| self.samples[i].label.index() as u32).collect();
        let images = preprocess::stack(images, self.image_size, &self.device)?;
        let labels = Tensor::new(label_values.as_slice(), &self.device)?;

        Ok(Batch {
            images,
            labels,
            label_values,
        })
    }

    fn load_sample(&self, index: usize, epoch: usize) -> Result<Vec<f32>> {
        let sample = &self.samples[index];
        let image = image::open(&sample.path)
            .map_err(|e| DetectError::Decode(format!("{}: {}", sample.path.display(), e)))?
            .to_rgb8();

        let mut image = preprocess::resize(&image, self.image_size);
        if let Some(augmenter) = &self.augmenter {
            image = augmenter.apply(image, &mut sample_rng(self.seed, epoch, index));
        }

        Ok(preprocess::normalize(&image))
    }
}
