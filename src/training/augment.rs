//! Random photometric and geometric perturbations applied to training crops.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augmenter {
    pub flip_probability: f64,
    /// Maximum rotation either way, in degrees
    pub max_rotation: f32,
    /// Brightness factor drawn from `[1 - b, 1 + b]`
    pub brightness: f32,
    /// Contrast factor drawn from `[1 - c, 1 + c]`
    pub contrast: f32,
}

impl Default for Augmenter {
    fn default() -> Self {
        Self {
            flip_probability: 0.5,
            max_rotation: 10.0,
            brightness: 0.2,
            contrast: 0.2,
        }
    }
}

impl Augmenter {
    pub fn apply(&self, image: RgbImage, rng: &mut impl Rng) -> RgbImage {
        let mut image = image;

        if rng.random_bool(self.flip_probability) {
            image = image::imageops::flip_horizontal(&image);
        }

        if self.max_rotation > 0.0 {
            let degrees: f32 = rng.random_range(-self.max_rotation..=self.max_rotation);
            if degrees != 0.0 {
                image = rotate_about_center(&image, degrees.to_radians(), Interpolation::Bilinear, Rgb([0, 0, 0]));
            }
        }

        let brightness = jitter_factor(rng, self.brightness);
        let contrast = jitter_factor(rng, self.contrast);
        adjust_brightness(&mut image, brightness);
        adjust_contrast(&mut image, contrast);

        image
    }
}

fn jitter_factor(rng: &mut impl Rng, amount: f32) -> f32 {
    if amount <= 0.0 {
        return 1.0;
    }
    rng.random_range((1.0 - amount).max(0.0)..=1.0 + amount)
}

fn adjust_brightness(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Blend every pixel with the mean luma of the image.
fn adjust_contrast(image: &mut RgbImage, factor: f32) {
    let count = (image.width() * image.height()) as f32;
    if count == 0.0 {
        return;
    }
    let mean = image
        .pixels()
        .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
        .sum::<f32>()
        / count;

    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = ((*c as f32 - mean) * factor + mean).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Generator for one sample of one epoch.
///
/// Depends only on its inputs, so augmentation does not change with the
/// number of loader threads or the order they finish in.
pub fn sample_rng(seed: u64, epoch: usize, index: usize) -> StdRng {
    let mixed = seed
        ^ (epoch as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_add(1).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    StdRng::seed_from_u64(mixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]))
    }

    #[test]
    fn test_same_seed_same_result() {
        let augmenter = Augmenter::default();
        let a = augmenter.apply(gradient(), &mut sample_rng(42, 3, 17));
        let b = augmenter.apply(gradient(), &mut sample_rng(42, 3, 17));
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), (32, 32));
    }

    #[test]
    fn test_epochs_draw_different_augmentations() {
        let augmenter = Augmenter::default();
        let results: Vec<RgbImage> = (0..4)
            .map(|epoch| augmenter.apply(gradient(), &mut sample_rng(42, epoch, 0)))
            .collect();
        assert!(results.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_identity_settings() {
        let augmenter = Augmenter {
            flip_probability: 0.0,
            max_rotation: 0.0,
            brightness: 0.0,
            contrast: 0.0,
        };
        let image = gradient();
        assert_eq!(augmenter.apply(image.clone(), &mut sample_rng(1, 0, 0)), image);
    }

    #[test]
    fn test_brightness_and_contrast() {
        let mut image = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        image.put_pixel(1, 0, Rgb([200, 200, 200]));

        let mut bright = image.clone();
        adjust_brightness(&mut bright, 1.2);
        assert_eq!(bright.get_pixel(0, 0)[0], 120);
        assert_eq!(bright.get_pixel(1, 0)[0], 240);

        let mut flat = image.clone();
        adjust_contrast(&mut flat, 0.0);
        assert_eq!(flat.get_pixel(0, 0), flat.get_pixel(1, 0));
    }
}
