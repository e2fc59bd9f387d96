//! # Mask Attribute Classification
//!
//! A Rust library for multi-attribute face-crop classification using the Burn
//! framework. Each crop carries three labels (mask wearing, gender, age
//! bucket) that combine into one 18-way composite class.
//!
//! ## Features
//!
//! - **Group-aware splitting** so all crops of a person stay on one side of
//!   the train/validation split
//! - **Two architectures**: a compact from-scratch CNN and a ResNet-18 style
//!   backbone with a replaceable classification head and layer freezing
//! - **Dual best checkpoints** tracked independently by validation accuracy
//!   and macro F1
//! - **Attribute ensembling** at inference time: three single-attribute
//!   models combine into the composite class
//!
//! ## Modules
//!
//! - `dataset`: Metadata handling, splitting, normalization statistics and
//!   Burn dataset/batcher integration
//! - `model`: CNN and residual backbone architectures built with Burn
//! - `training`: Training loop, learning rate scheduling and run artifacts
//! - `inference`: Manifest inference, ensembling and single-image prediction
//! - `settings`: Resolved run configuration and run directory management
//! - `utils`: Errors, logging, metrics, charts and experiment tracking
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mask_attr::backend::TrainingBackend;
//! use mask_attr::settings::TrainSettings;
//! use mask_attr::training::run_training;
//!
//! let settings = TrainSettings::default();
//! run_training::<TrainingBackend>(settings)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod settings;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{
    decode_class, encode_class, FaceCropBatch, FaceCropBatcher, FaceCropDataset, FaceCropItem,
    MetadataTable, TrainMode, NUM_CLASSES,
};
pub use inference::{run_inference, Predictor};
pub use model::{BackboneClassifier, ClassifierModel, CnnClassifier};
pub use settings::{InferSettings, TrainSettings};
pub use training::{run_training, Trainer, TrainingState};
pub use utils::error::{PipelineError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
