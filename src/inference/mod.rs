//! Inference over trained checkpoints
//!
//! This module provides:
//! - Batch inference over an evaluation manifest, single-model or as an
//!   attribute ensemble
//! - Single-image prediction with probabilities and decoded attributes

pub mod predictor;
pub mod runner;

// Re-export main types for convenience
pub use predictor::{LoadedModel, PredictionResult, Predictor};
pub use runner::{run_inference, InferenceReport, Manifest};
