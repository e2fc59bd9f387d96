//! Run settings and run directory management
//!
//! `TrainSettings` is the fully resolved configuration of one training run.
//! It is serialized as a pretty JSON snapshot into the run directory so a
//! checkpoint can always be traced back to the exact settings that produced
//! it.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dataset::stats::{ChannelStats, TRAIN_CHANNEL_STATS};
use crate::dataset::TrainMode;
use crate::training::trainer::Criterion;
use crate::utils::error::{PipelineError, Result};

/// Model architecture selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Compact CNN trained from scratch
    Scratch,
    /// ResNet-18 backbone with a linear head
    Backbone,
}

/// Optimizer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

/// Which best checkpoint to use at inference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Best validation accuracy
    Acc,
    /// Best validation macro F1
    F1,
}

impl MetricKind {
    /// Suffix appended to checkpoint stems for this metric.
    pub fn suffix(self) -> &'static str {
        match self {
            MetricKind::Acc => "",
            MetricKind::F1 => "f1",
        }
    }

    /// Full checkpoint stem for a base name, e.g. `best` / `bestf1`.
    pub fn checkpoint_stem(self, base: &str) -> String {
        format!("{}{}", base, self.suffix())
    }
}

/// Fully resolved configuration of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSettings {
    /// Metadata CSV path
    pub metadata: PathBuf,
    /// Root of the image tree the metadata paths are rebased onto
    pub data_dir: PathBuf,
    /// Directory that holds run directories
    pub model_dir: PathBuf,
    /// Run name; the run directory is derived from it
    pub name: String,
    /// Reuse an existing run directory instead of incrementing
    pub dump: bool,
    pub seed: u64,
    pub epochs: usize,
    /// Input size as `[height, width]`
    pub resize: [usize; 2],
    pub batch_size: usize,
    pub val_batch_size: usize,
    pub model: ModelKind,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    /// Epochs between learning rate halvings
    pub lr_decay_step: usize,
    /// Fraction of person groups held out for validation
    pub val_ratio: f64,
    pub criterion: Criterion,
    /// Batches between windowed progress logs
    pub log_interval: usize,
    pub mode: TrainMode,
    /// Normalization mean per channel
    pub mean: [f32; 3],
    /// Normalization std per channel
    pub std: [f32; 3],
    /// Measure normalization statistics from the data instead
    pub compute_stats: bool,
    /// Pretrained backbone record to load before training
    pub backbone_weights: Option<PathBuf>,
    /// Backbone layers to freeze
    pub freeze: Vec<String>,
}

impl TrainSettings {
    pub fn channel_stats(&self) -> ChannelStats {
        ChannelStats {
            mean: self.mean,
            std: self.std,
        }
    }
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            metadata: PathBuf::from("processed_train.csv"),
            data_dir: PathBuf::from("/opt/ml/input/data/train/images"),
            model_dir: PathBuf::from("./model"),
            name: "exp".to_string(),
            dump: false,
            seed: 42,
            epochs: 5,
            resize: [512, 384],
            batch_size: 64,
            val_batch_size: 64,
            model: ModelKind::Backbone,
            optimizer: OptimizerKind::Adam,
            learning_rate: 1e-3,
            lr_decay_step: 20,
            val_ratio: 0.2,
            criterion: Criterion::CrossEntropy,
            log_interval: 20,
            mode: TrainMode::Multi,
            mean: TRAIN_CHANNEL_STATS.mean,
            std: TRAIN_CHANNEL_STATS.std,
            compute_stats: false,
            backbone_weights: None,
            freeze: Vec::new(),
        }
    }
}

/// Settings for batch inference over a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferSettings {
    /// Evaluation root holding `info.csv` and an `images/` directory
    pub data_dir: PathBuf,
    /// Run directory holding the checkpoints
    pub model_dir: PathBuf,
    /// Where `output.csv` is written
    pub output_dir: PathBuf,
    pub batch_size: usize,
    /// Input size as `[height, width]`
    pub resize: [usize; 2],
    pub model: ModelKind,
    /// Combine the three single-attribute models instead of one composite model
    pub ensemble: bool,
    pub metric: MetricKind,
}

/// Resolve (and create) the run directory for a named run.
///
/// The first run named `exp` gets `{model_dir}/exp`; later runs get `exp2`,
/// `exp3` and so on, scanning existing siblings for the highest taken
/// suffix. With `dump` set, the base directory is reused as-is.
pub fn resolve_run_dir(model_dir: &Path, name: &str, dump: bool) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(PipelineError::Config(
            "run name must not be empty".to_string(),
        ));
    }

    let base = model_dir.join(name);
    if dump || !base.exists() {
        std::fs::create_dir_all(&base)?;
        return Ok(base);
    }

    // The unsuffixed directory counts as run 1.
    let mut max_suffix = 1u32;
    for entry in std::fs::read_dir(model_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let dir_name = file_name.to_string_lossy();
        if let Some(suffix) = dir_name.strip_prefix(name) {
            if let Ok(n) = suffix.parse::<u32>() {
                max_suffix = max_suffix.max(n);
            }
        }
    }

    let next = model_dir.join(format!("{}{}", name, max_suffix + 1));
    std::fs::create_dir_all(&next)?;
    Ok(next)
}

/// Write the settings snapshot into the run directory as `{stem}.json`.
pub fn save_snapshot(settings: &TrainSettings, run_dir: &Path, stem: &str) -> Result<PathBuf> {
    let path = run_dir.join(format!("{}.json", stem));
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    std::fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_stems() {
        assert_eq!(MetricKind::Acc.checkpoint_stem("best"), "best");
        assert_eq!(MetricKind::F1.checkpoint_stem("best"), "bestf1");
        assert_eq!(MetricKind::F1.checkpoint_stem("mask"), "maskf1");
    }

    #[test]
    fn test_resolve_run_dir_increments() {
        let dir = tempfile::tempdir().unwrap();

        let first = resolve_run_dir(dir.path(), "exp", false).unwrap();
        assert_eq!(first, dir.path().join("exp"));
        assert!(first.is_dir());

        let second = resolve_run_dir(dir.path(), "exp", false).unwrap();
        assert_eq!(second, dir.path().join("exp2"));

        let third = resolve_run_dir(dir.path(), "exp", false).unwrap();
        assert_eq!(third, dir.path().join("exp3"));
    }

    #[test]
    fn test_resolve_run_dir_skips_gaps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("exp")).unwrap();
        std::fs::create_dir(dir.path().join("exp7")).unwrap();
        std::fs::create_dir(dir.path().join("expfoo")).unwrap();

        let next = resolve_run_dir(dir.path(), "exp", false).unwrap();
        assert_eq!(next, dir.path().join("exp8"));
    }

    #[test]
    fn test_resolve_run_dir_dump_reuses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("exp")).unwrap();

        let reused = resolve_run_dir(dir.path(), "exp", true).unwrap();
        assert_eq!(reused, dir.path().join("exp"));
    }

    #[test]
    fn test_resolve_run_dir_ignores_other_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("exp")).unwrap();
        std::fs::create_dir(dir.path().join("other5")).unwrap();

        let next = resolve_run_dir(dir.path(), "exp", false).unwrap();
        assert_eq!(next, dir.path().join("exp2"));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = TrainSettings {
            name: "exp".to_string(),
            epochs: 12,
            mode: TrainMode::Gender,
            ..TrainSettings::default()
        };

        let path = save_snapshot(&settings, dir.path(), "gender").unwrap();
        assert_eq!(path, dir.path().join("gender.json"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: TrainSettings = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.epochs, 12);
        assert_eq!(parsed.mode, TrainMode::Gender);
        assert_eq!(parsed.resize, [512, 384]);
    }
}
