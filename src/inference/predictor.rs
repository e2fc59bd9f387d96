//! Checkpoint loading and single-image prediction

use burn::data::dataloader::batcher::Batcher;
use burn::module::Module;
use burn::prelude::*;
use burn::record::CompactRecorder;
use colored::Colorize;
use std::path::Path;

use crate::dataset::{
    class_description, decode_class, ChannelStats, FaceCropBatcher, FaceCropItem, ImageTransform,
    NUM_CLASSES,
};
use crate::model::{
    BackboneClassifier, BackboneClassifierConfig, ClassifierModel, CnnClassifier,
    CnnClassifierConfig,
};
use crate::settings::ModelKind;
use crate::utils::error::{PipelineError, Result};

/// A classifier restored from a training checkpoint.
///
/// Both architectures save their records under a bare file stem (the
/// recorder appends `.mpk`), so loading needs the architecture and class
/// count the run was configured with.
pub enum LoadedModel<B: Backend> {
    Scratch(CnnClassifier<B>),
    Backbone(BackboneClassifier<B>),
}

impl<B: Backend> LoadedModel<B> {
    /// Restore a checkpoint saved under `path` (without extension).
    pub fn load(
        kind: ModelKind,
        num_classes: usize,
        path: &Path,
        device: &B::Device,
    ) -> Result<Self> {
        let record_path = path.with_extension("mpk");
        if !record_path.exists() {
            return Err(PipelineError::PathNotFound(record_path));
        }

        let recorder = CompactRecorder::new();
        let model = match kind {
            ModelKind::Scratch => {
                let config = CnnClassifierConfig::new().with_num_classes(num_classes);
                let model = CnnClassifier::new(&config, device)
                    .load_file(path.to_path_buf(), &recorder, device)
                    .map_err(|e| {
                        PipelineError::Model(format!(
                            "failed to load checkpoint '{}': {:?}",
                            record_path.display(),
                            e
                        ))
                    })?;
                LoadedModel::Scratch(model)
            }
            ModelKind::Backbone => {
                let config = BackboneClassifierConfig::new().with_num_classes(num_classes);
                let model = BackboneClassifier::new(&config, device)
                    .load_file(path.to_path_buf(), &recorder, device)
                    .map_err(|e| {
                        PipelineError::Model(format!(
                            "failed to load checkpoint '{}': {:?}",
                            record_path.display(),
                            e
                        ))
                    })?;
                LoadedModel::Backbone(model)
            }
        };

        tracing::info!(
            "Loaded {:?} model with {} classes from {}",
            kind,
            num_classes,
            record_path.display()
        );
        Ok(model)
    }
}

impl<B: Backend> ClassifierModel<B> for LoadedModel<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            LoadedModel::Scratch(model) => model.forward(images),
            LoadedModel::Backbone(model) => model.forward(images),
        }
    }

    fn num_classes(&self) -> usize {
        match self {
            LoadedModel::Scratch(model) => ClassifierModel::<B>::num_classes(model),
            LoadedModel::Backbone(model) => ClassifierModel::<B>::num_classes(model),
        }
    }
}

/// Prediction for a single image.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    /// Predicted class index
    pub class: usize,
    /// Probability of the predicted class
    pub confidence: f32,
    /// All classes sorted by probability, best first; truncate for display
    pub top_k: Vec<(usize, f32)>,
    /// Shannon entropy of the probability distribution (nats)
    pub entropy: f32,
    /// Probability gap between the best and second-best class
    pub margin: f32,
    /// Decoded `(mask, gender, age)` when the model is the composite one
    pub attributes: Option<(usize, usize, usize)>,
}

impl PredictionResult {
    /// Derive a result from one row of softmax probabilities.
    pub fn from_probs(probs: &[f32]) -> Self {
        let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (class, confidence) = indexed.first().copied().unwrap_or((0, 0.0));
        let margin = if indexed.len() > 1 {
            confidence - indexed[1].1
        } else {
            confidence
        };
        let entropy = -probs
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| p * p.ln())
            .sum::<f32>();
        let attributes = if probs.len() == NUM_CLASSES {
            decode_class(class)
        } else {
            None
        };

        Self {
            class,
            confidence,
            top_k: indexed,
            entropy,
            margin,
            attributes,
        }
    }

    /// Keep only the `k` most probable classes.
    pub fn truncated(mut self, k: usize) -> Self {
        self.top_k.truncate(k.max(1));
        self
    }

    /// Colored multi-line summary for console output.
    pub fn display(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "  Predicted class: {} ({:.1}% confidence)\n",
            self.class.to_string().green().bold(),
            self.confidence * 100.0
        ));
        if self.attributes.is_some() {
            if let Some(description) = class_description(self.class) {
                out.push_str(&format!("  Attributes:      {}\n", description.cyan()));
            }
        }
        out.push_str(&format!(
            "  Margin: {:.4} | Entropy: {:.4}\n",
            self.margin, self.entropy
        ));
        out.push_str("  Top predictions:\n");
        for (rank, (class, prob)) in self.top_k.iter().enumerate() {
            let label = if self.attributes.is_some() {
                class_description(*class)
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default()
            } else {
                String::new()
            };
            out.push_str(&format!(
                "    {}. class {:>2}{} {:.2}%\n",
                rank + 1,
                class,
                label,
                prob * 100.0
            ));
        }
        out
    }
}

/// Convenience wrapper for predicting single images from disk.
pub struct Predictor<B: Backend> {
    model: LoadedModel<B>,
    transform: ImageTransform,
    batcher: FaceCropBatcher,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn from_checkpoint(
        kind: ModelKind,
        num_classes: usize,
        checkpoint: &Path,
        stats: ChannelStats,
        resize: [usize; 2],
        device: B::Device,
    ) -> Result<Self> {
        let model = LoadedModel::load(kind, num_classes, checkpoint, &device)?;
        Ok(Self {
            model,
            transform: ImageTransform::new(resize),
            batcher: FaceCropBatcher::new(stats, resize),
            device,
        })
    }

    /// Classify one image file.
    pub fn predict(&self, path: &Path) -> Result<PredictionResult> {
        let image = self.transform.apply(path)?;
        let item = FaceCropItem {
            image,
            label: 0,
            path: path.display().to_string(),
        };
        let batch = self.batcher.batch(vec![item], &self.device);
        let probs = self.model.forward_softmax(batch.images);
        let values: Vec<f32> = probs.into_data().to_vec::<f32>().unwrap();
        Ok(PredictionResult::from_probs(&values))
    }
}
