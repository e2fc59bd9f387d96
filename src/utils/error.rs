//! Error handling for the face attribute pipeline
//!
//! Defines the error types used across dataset preparation, training and
//! inference, plus a small extension trait for attaching context to results.

use std::path::PathBuf;
use thiserror::Error;

/// Error type covering every stage of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoadError(PathBuf, String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Split error: {0}")]
    Split(String),

    #[error("Statistics error: {0}")]
    Stats(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add a static context message to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Add a lazily evaluated context message to an error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| PipelineError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| PipelineError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PipelineError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| PipelineError::InvalidInput(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Metadata("missing column 'Mask'".to_string());
        assert_eq!(err.to_string(), "Metadata error: missing column 'Mask'");

        let err = PipelineError::PathNotFound(PathBuf::from("/tmp/missing.csv"));
        assert!(err.to_string().contains("/tmp/missing.csv"));
    }

    #[test]
    fn test_image_load_error() {
        let err = PipelineError::ImageLoadError(
            PathBuf::from("/data/images/000001/mask1.jpg"),
            "unexpected EOF".to_string(),
        );
        let msg = err.to_string();
        assert!(msg.contains("mask1.jpg"));
        assert!(msg.contains("unexpected EOF"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_result_ext_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        ));
        let with_ctx = result.context("writing checkpoint");
        assert!(with_ctx.is_err());
        let msg = with_ctx.unwrap_err().to_string();
        assert!(msg.contains("writing checkpoint"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_option_context() {
        let value: Option<usize> = None;
        let result = value.with_context(|| "no samples matched the filter".to_string());
        assert!(result.is_err());

        let value: Option<usize> = Some(3);
        assert_eq!(value.context("should not fail").unwrap(), 3);
    }
}
