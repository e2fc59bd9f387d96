//! Per-channel normalization statistics
//!
//! Batches are normalized with fixed per-channel mean/std. The defaults were
//! measured over the training images; `compute_channel_stats` recomputes them
//! for a new dataset by averaging per-image channel means and mean squares.

use crate::utils::error::{PipelineError, Result};
use crate::utils::logging::ProgressLogger;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Per-channel mean and standard deviation in [0, 1] scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mean = [{:.4}, {:.4}, {:.4}], std = [{:.4}, {:.4}, {:.4}]",
            self.mean[0], self.mean[1], self.mean[2], self.std[0], self.std[1], self.std[2]
        )
    }
}

/// Statistics measured on the training images.
pub const TRAIN_CHANNEL_STATS: ChannelStats = ChannelStats {
    mean: [0.560_193_6, 0.524_101_2, 0.501_457],
    std: [0.233_186_03, 0.243_000_33, 0.245_675_22],
};

/// Statistics used for the evaluation images.
pub const EVAL_CHANNEL_STATS: ChannelStats = ChannelStats {
    mean: [0.548, 0.504, 0.479],
    std: [0.237, 0.247, 0.246],
};

/// Measure channel statistics over a set of images.
///
/// Per image, the channel mean and mean square are computed at full
/// resolution; those per-image values are then averaged and the standard
/// deviation derived as `sqrt(E[x^2] - E[x]^2)`. With `limit` set, only the
/// first `limit` paths are read.
///
/// An unreadable image aborts the computation rather than silently skewing
/// the result.
pub fn compute_channel_stats(
    paths: &[PathBuf],
    limit: Option<usize>,
) -> Result<ChannelStats> {
    let selected = match limit {
        Some(n) => &paths[..n.min(paths.len())],
        None => paths,
    };
    if selected.is_empty() {
        return Err(PipelineError::Stats(
            "no images to compute statistics from".to_string(),
        ));
    }

    let mut mean_sum = [0.0f64; 3];
    let mut sq_sum = [0.0f64; 3];
    let mut progress = ProgressLogger::new("Computing channel statistics", selected.len());

    for path in selected {
        let img = ImageReader::open(path)
            .map_err(|e| PipelineError::ImageLoadError(path.clone(), e.to_string()))?
            .decode()
            .map_err(|e| PipelineError::ImageLoadError(path.clone(), e.to_string()))?
            .to_rgb8();

        let num_pixels = (img.width() * img.height()) as f64;
        let mut channel_sum = [0.0f64; 3];
        let mut channel_sq = [0.0f64; 3];
        for pixel in img.pixels() {
            for c in 0..3 {
                let value = pixel[c] as f64 / 255.0;
                channel_sum[c] += value;
                channel_sq[c] += value * value;
            }
        }
        for c in 0..3 {
            mean_sum[c] += channel_sum[c] / num_pixels;
            sq_sum[c] += channel_sq[c] / num_pixels;
        }
        progress.increment();
    }
    progress.finish();

    let count = selected.len() as f64;
    let mut mean = [0.0f32; 3];
    let mut std = [0.0f32; 3];
    for c in 0..3 {
        let m = mean_sum[c] / count;
        let variance = (sq_sum[c] / count - m * m).max(0.0);
        mean[c] = m as f32;
        std[c] = variance.sqrt() as f32;
    }

    Ok(ChannelStats { mean, std })
}
