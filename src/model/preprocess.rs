//! Image to tensor conversion shared by training and inference.

use candle_core::{Device, Tensor};
use image::{imageops, RgbImage};

/// ImageNet channel statistics.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize to `size` x `size` (bilinear), ignoring aspect ratio.
pub fn resize(image: &RgbImage, size: usize) -> RgbImage {
    let size = size as u32;
    if image.dimensions() == (size, size) {
        return image.clone();
    }
    imageops::resize(image, size, size, imageops::FilterType::Triangle)
}

/// Scale to [0, 1], normalize per channel and lay out as CHW.
pub fn normalize(image: &RgbImage) -> Vec<f32> {
    let plane = (image.width() * image.height()) as usize;
    let mut out = vec![0f32; 3 * plane];
    for (idx, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + idx] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    out
}

/// Stack CHW buffers of `size` x `size` images into a (N, 3, size, size) tensor.
pub fn stack(images: Vec<Vec<f32>>, size: usize, device: &Device) -> candle_core::Result<Tensor> {
    let n = images.len();
    let flat: Vec<f32> = images.into_iter().flatten().collect();
    Tensor::from_vec(flat, (n, 3, size, size), device)
}

/// Full inference preprocessing for one image: a (1, 3, size, size) tensor.
pub fn image_tensor(image: &RgbImage, size: usize, device: &Device) -> candle_core::Result<Tensor> {
    stack(vec![normalize(&resize(image, size))], size, device)
}
