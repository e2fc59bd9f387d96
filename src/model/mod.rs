//! Neural network models
//!
//! This module provides:
//! - `CnnClassifier`: a compact CNN trained from scratch
//! - `BackboneClassifier`: ResNet-18 features with a replaceable linear head
//! - `ClassifierModel`: the common interface the trainer and predictor use

pub mod backbone;
pub mod cnn;

// Re-export main types for convenience
pub use backbone::{
    BackboneClassifier, BackboneClassifierConfig, BasicBlock, ResNetBackbone,
    FREEZE_LAYER_NAMES,
};
pub use cnn::{CnnClassifier, CnnClassifierConfig, ConvBlock};

use burn::prelude::*;
use burn::tensor::activation::softmax;

/// Common interface over the classifier architectures.
pub trait ClassifierModel<B: Backend> {
    /// Compute class logits for a batch of images `[batch, 3, H, W]`.
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Class probabilities, softmax over the logits.
    fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}
