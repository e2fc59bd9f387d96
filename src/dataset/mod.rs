//! Dataset handling for multi-attribute face crops
//!
//! This module provides:
//! - Metadata CSV loading, validation and path rebasing
//! - Group-aware train/validation splitting (all crops of a person stay on
//!   one side of the split)
//! - Per-channel normalization statistics
//! - Burn `Dataset`/`Batcher` integration with lazy image loading
//! - Metadata preparation from the raw image tree
//!
//! Every sample carries three attribute labels that combine into a single
//! composite class: `class = mask * 6 + gender * 3 + age`.

pub mod burn_dataset;
pub mod metadata;
pub mod prepare;
pub mod split;
pub mod stats;

// Re-export main types for convenience
pub use burn_dataset::{
    denormalize_chw, FaceCropBatch, FaceCropBatcher, FaceCropDataset, FaceCropItem,
    ImageTransform,
};
pub use metadata::{MetadataTable, SampleRecord};
pub use prepare::{build_metadata, PrepareSummary};
pub use split::{DatasetSplits, DistributionReport, SplitConfig, SplitStats};
pub use stats::{compute_channel_stats, ChannelStats, EVAL_CHANNEL_STATS, TRAIN_CHANNEL_STATS};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Number of composite classes (3 mask states x 2 genders x 3 age buckets).
pub const NUM_CLASSES: usize = 18;

/// Number of mask states.
pub const NUM_MASK_CLASSES: usize = 3;

/// Number of gender labels.
pub const NUM_GENDER_CLASSES: usize = 2;

/// Number of age buckets.
pub const NUM_AGE_CLASSES: usize = 3;

/// Mask state names indexed by label.
pub const MASK_LABELS: [&str; NUM_MASK_CLASSES] = ["worn", "incorrect", "not_worn"];

/// Gender names indexed by label.
pub const GENDER_LABELS: [&str; NUM_GENDER_CLASSES] = ["male", "female"];

/// Age bucket names indexed by label.
pub const AGE_LABELS: [&str; NUM_AGE_CLASSES] = ["under_30", "30_to_59", "over_60"];

/// Combine attribute labels into the composite class.
///
/// Returns `None` when any label is out of range.
pub fn encode_class(mask: usize, gender: usize, age: usize) -> Option<usize> {
    if mask >= NUM_MASK_CLASSES || gender >= NUM_GENDER_CLASSES || age >= NUM_AGE_CLASSES {
        return None;
    }
    Some(mask * 6 + gender * 3 + age)
}

/// Split a composite class back into `(mask, gender, age)`.
pub fn decode_class(class: usize) -> Option<(usize, usize, usize)> {
    if class >= NUM_CLASSES {
        return None;
    }
    Some(((class / 6) % 3, (class / 3) % 2, class % 3))
}

/// Human-readable description of a composite class.
pub fn class_description(class: usize) -> Option<String> {
    let (mask, gender, age) = decode_class(class)?;
    Some(format!(
        "{} / {} / {}",
        MASK_LABELS[mask], GENDER_LABELS[gender], AGE_LABELS[age]
    ))
}

/// Which labels a training run targets.
///
/// `Multi` trains on the 18 composite classes; the single-attribute modes
/// train the heads used for attribute-wise ensembling at inference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrainMode {
    Multi,
    Mask,
    Gender,
    Age,
}

impl TrainMode {
    /// Number of output classes under this mode.
    pub fn num_classes(self) -> usize {
        match self {
            TrainMode::Multi => NUM_CLASSES,
            TrainMode::Mask => NUM_MASK_CLASSES,
            TrainMode::Gender => NUM_GENDER_CLASSES,
            TrainMode::Age => NUM_AGE_CLASSES,
        }
    }

    /// File stem used for this mode's checkpoints.
    pub fn checkpoint_stem(self) -> &'static str {
        match self {
            TrainMode::Multi => "best",
            TrainMode::Mask => "mask",
            TrainMode::Gender => "gender",
            TrainMode::Age => "age",
        }
    }

    /// The label a sample carries under this mode.
    pub fn label_of(self, record: &SampleRecord) -> usize {
        match self {
            TrainMode::Multi => record.class,
            TrainMode::Mask => record.mask,
            TrainMode::Gender => record.gender,
            TrainMode::Age => record.age,
        }
    }
}

impl std::fmt::Display for TrainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrainMode::Multi => "multi",
            TrainMode::Mask => "mask",
            TrainMode::Gender => "gender",
            TrainMode::Age => "age",
        };
        write!(f, "{}", s)
    }
}
