use serde::Serialize;
use thiserror::Error;

/// Failure reported through a recognition engine's error channel.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
pub enum EngineError {
    #[error("OCR engine timed out after {0} ms")]
    Timeout(u64),
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    #[error("OCR engine failed: {0}")]
    Failed(String),
    #[error("OCR image decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum MrzError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Image processing error: {0}")]
    ImageProcessing(String),
    #[error("Preset store error: {0}")]
    PresetStore(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MrzError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        MrzError::InvalidArgument(msg.into())
    }
}
