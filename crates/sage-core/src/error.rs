//! Error types for the research pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SageError>;

#[derive(Debug, Error)]
pub enum SageError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Source '{source_name}' failed: {message}")]
    Source { source_name: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted store file {path}: {reason}")]
    CorruptStore { path: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Please enter a question.")]
    EmptyQuestion,

    #[error("Invalid dimension: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl SageError {
    pub fn fetch(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn corrupt(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Self::CorruptStore {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from fetching external knowledge.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Self::Source { .. } | Self::Http(_) | Self::Xml(_) | Self::Json(_)
        )
    }
}

impl From<ort::OrtError> for SageError {
    fn from(err: ort::OrtError) -> Self {
        Self::Embedding(err.to_string())
    }
}

impl From<candle_core::Error> for SageError {
    fn from(err: candle_core::Error) -> Self {
        Self::Generation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SageError::fetch("wikipedia", "page not found");
        assert_eq!(err.to_string(), "Source 'wikipedia' failed: page not found");

        let err = SageError::DimensionMismatch { expected: 384, got: 3 };
        assert_eq!(err.to_string(), "Invalid dimension: expected 384, got 3");

        assert_eq!(SageError::EmptyQuestion.to_string(), "Please enter a question.");
    }

    #[test]
    fn test_fetch_failure_classification() {
        assert!(SageError::fetch("arxiv", "timeout").is_fetch_failure());
        assert!(!SageError::EmptyQuestion.is_fetch_failure());
        assert!(!SageError::Storage("disk full".into()).is_fetch_failure());
    }
}
