use std::time::Duration;

use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to read image {path}: {source}")]
    ReadImage {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to encode view state: {0}")]
    Json(#[from] serde_json::Error),
    #[error("The session is no longer running.")]
    SessionClosed,
    #[error("Session task failed: {0}")]
    SessionTask(String),
}

// Failures reported by a scoring collaborator. Each one ends the run in `Failed`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Classifier did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Classifier returned a malformed result: {0}")]
    Malformed(String),
    #[error("Classifier failed: {0}")]
    Backend(String),
}

// Failures while preparing the subject for scoring. Each one ends the run in `Failed`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("Could not decode image: {0}")]
    Decode(String),
    #[error("Could not read text from image: {0}")]
    Extract(String),
}
