//! Burn dataset and batcher for face crops
//!
//! Implements Burn's `Dataset` trait over metadata records, with lazy image
//! loading through a configured resize transform, and a `Batcher` that stacks
//! items into normalized CHW tensors.
//!
//! The training path reads samples through [`FaceCropDataset::get_checked`],
//! which propagates image loading failures instead of dropping samples
//! silently.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{ImageReader, Rgb, RgbImage};
use std::path::Path;

use crate::dataset::metadata::SampleRecord;
use crate::dataset::stats::ChannelStats;
use crate::dataset::TrainMode;
use crate::utils::error::{PipelineError, Result};

/// Message used when samples are read before a transform is configured.
pub const TRANSFORM_REQUIRED: &str =
    "an image transform must be configured before samples can be read";

/// Deterministic resize applied to every image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransform {
    /// Target size as `[height, width]`
    pub resize: [usize; 2],
}

impl ImageTransform {
    pub fn new(resize: [usize; 2]) -> Self {
        Self { resize }
    }

    /// Load an image, resize it and return CHW floats in [0, 1].
    pub fn apply(&self, path: &Path) -> Result<Vec<f32>> {
        let [height, width] = self.resize;
        let img = ImageReader::open(path)
            .map_err(|e| PipelineError::ImageLoadError(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| PipelineError::ImageLoadError(path.to_path_buf(), e.to_string()))?
            .resize_exact(width as u32, height as u32, FilterType::Triangle)
            .to_rgb8();

        let mut image = vec![0.0f32; 3 * height * width];
        for y in 0..height {
            for x in 0..width {
                let pixel = img.get_pixel(x as u32, y as u32);
                image[y * width + x] = pixel[0] as f32 / 255.0;
                image[height * width + y * width + x] = pixel[1] as f32 / 255.0;
                image[2 * height * width + y * width + x] = pixel[2] as f32 / 255.0;
            }
        }
        Ok(image)
    }
}

/// A single face crop ready for batching.
#[derive(Clone, Debug)]
pub struct FaceCropItem {
    /// Image data as flattened CHW float array `[3 * H * W]` in [0, 1]
    pub image: Vec<f32>,
    /// Label under the dataset's training mode
    pub label: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

/// Dataset over metadata records with lazy image loading.
pub struct FaceCropDataset {
    samples: Vec<SampleRecord>,
    mode: TrainMode,
    transform: Option<ImageTransform>,
}

impl FaceCropDataset {
    /// Create a dataset without a transform. Reading samples will fail until
    /// [`set_transform`](Self::set_transform) is called.
    pub fn new(samples: Vec<SampleRecord>, mode: TrainMode) -> Self {
        Self {
            samples,
            mode,
            transform: None,
        }
    }

    pub fn with_transform(
        samples: Vec<SampleRecord>,
        mode: TrainMode,
        transform: ImageTransform,
    ) -> Self {
        Self {
            samples,
            mode,
            transform: Some(transform),
        }
    }

    pub fn set_transform(&mut self, transform: ImageTransform) {
        self.transform = Some(transform);
    }

    /// The configured transform, or an error if none is set.
    pub fn ensure_transform(&self) -> Result<&ImageTransform> {
        self.transform
            .as_ref()
            .ok_or_else(|| PipelineError::Dataset(TRANSFORM_REQUIRED.to_string()))
    }

    /// Read one sample, propagating every failure.
    pub fn get_checked(&self, index: usize) -> Result<FaceCropItem> {
        if index >= self.samples.len() {
            return Err(PipelineError::InvalidInput(format!(
                "sample index {} out of range for dataset of {} samples",
                index,
                self.samples.len()
            )));
        }
        let transform = self.ensure_transform()?;
        self.load_item(transform, index)
    }

    fn load_item(&self, transform: &ImageTransform, index: usize) -> Result<FaceCropItem> {
        let record = &self.samples[index];
        let image = transform.apply(&record.full_path)?;
        Ok(FaceCropItem {
            image,
            label: self.mode.label_of(record),
            path: record.full_path.display().to_string(),
        })
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.samples
    }

    pub fn mode(&self) -> TrainMode {
        self.mode
    }

    /// Labels of all samples under the dataset's training mode.
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|r| self.mode.label_of(r)).collect()
    }
}

impl Dataset<FaceCropItem> for FaceCropDataset {
    fn get(&self, index: usize) -> Option<FaceCropItem> {
        if index >= self.samples.len() {
            return None;
        }
        let Some(transform) = &self.transform else {
            panic!("{}", TRANSFORM_REQUIRED);
        };
        self.load_item(transform, index).ok()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Invert batch normalization back to u8 pixels.
///
/// Values are mapped as `clamp((x * std + mean) * 255, 0, 255)`, so the
/// output is a viewable image regardless of how far the inputs drifted.
pub fn denormalize_chw(
    image: &[f32],
    stats: &ChannelStats,
    height: usize,
    width: usize,
) -> RgbImage {
    let mut out = RgbImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let mut pixel = [0u8; 3];
            for c in 0..3 {
                let value = image[c * height * width + y * width + x];
                let restored = (value * stats.std[c] + stats.mean[c]) * 255.0;
                pixel[c] = restored.clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x as u32, y as u32, Rgb(pixel));
        }
    }
    out
}

/// A batch of face crops on a device.
#[derive(Clone, Debug)]
pub struct FaceCropBatch<B: Backend> {
    /// Normalized images `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// Class labels `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items into normalized tensors.
#[derive(Clone, Debug)]
pub struct FaceCropBatcher {
    stats: ChannelStats,
    resize: [usize; 2],
}

impl FaceCropBatcher {
    pub fn new(stats: ChannelStats, resize: [usize; 2]) -> Self {
        Self { stats, resize }
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub fn resize(&self) -> [usize; 2] {
        self.resize
    }
}

impl<B: Backend> Batcher<B, FaceCropItem, FaceCropBatch<B>> for FaceCropBatcher {
    fn batch(&self, items: Vec<FaceCropItem>, device: &B::Device) -> FaceCropBatch<B> {
        let batch_size = items.len();
        let [height, width] = self.resize;

        let mut images_data = Vec::with_capacity(batch_size * 3 * height * width);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend_from_slice(&item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, height, width]),
            device,
        );

        // Broadcast per-channel normalization over the batch.
        let mean = Tensor::<B, 4>::from_floats(
            TensorData::new(self.stats.mean.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let std = Tensor::<B, 4>::from_floats(
            TensorData::new(self.stats.std.to_vec(), [1, 3, 1, 1]),
            device,
        );
        let images = (images - mean) / std;

        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        FaceCropBatch { images, targets }
    }
}
