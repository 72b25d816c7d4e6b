//! Error types for the Taglens tagging pipeline.
//!
//! Errors are organized by the stage that raises them so the orchestrator can
//! decide how far each one propagates: input errors skip one file, inference
//! errors are isolated per batch, store errors fail one media item, and
//! configuration errors stop a run before it starts.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for Taglens operations.
#[derive(Error, Debug)]
pub enum TaglensError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Per-file pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Inference engine errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Result store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors. Always fatal, raised before a run starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Errors for a single input file. The run logs them and moves on.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Image decoding failed
    #[error("Decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Video probing or frame extraction failed
    #[error("Video error for {path}: {message}")]
    Video { path: PathBuf, message: String },

    /// Operation timed out
    #[error("Timeout in {stage} stage for {path} after {timeout_ms}ms")]
    Timeout {
        path: PathBuf,
        stage: String,
        timeout_ms: u64,
    },

    /// File exceeds size limit
    #[error("File too large: {path} ({size_mb}MB > {max_mb}MB)")]
    FileTooLarge {
        path: PathBuf,
        size_mb: u64,
        max_mb: u64,
    },

    /// Image dimensions exceed limit
    #[error("Image too large: {path} ({width}x{height} > {max_dim})")]
    ImageTooLarge {
        path: PathBuf,
        width: u32,
        height: u32,
        max_dim: u32,
    },

    /// Unsupported media format or pixel layout
    #[error("Unsupported format for {path}: {format}")]
    UnsupportedFormat { path: PathBuf, format: String },

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Reading the file failed
    #[error("IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Build an I/O error tagged with the file it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures at the inference engine boundary.
#[derive(Error, Debug, Clone)]
pub enum InferenceError {
    /// The engine rejected or crashed on the batch
    #[error("Inference failed: {message}")]
    Engine { message: String },

    /// The engine call exceeded its deadline
    #[error("Inference timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The engine returned a result that does not line up with the batch or vocabulary
    #[error("Inference output mismatch: expected {expected}, got {actual}")]
    OutputMismatch { expected: usize, actual: usize },

    /// The model could not be loaded
    #[error("Model error for {path}: {message}")]
    Model { path: PathBuf, message: String },
}

/// Failures of the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite reported an error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The store file could not be opened or prepared
    #[error("Failed to open store at {path}: {message}")]
    Open { path: PathBuf, message: String },

    /// A tag row was submitted for a media item that was never processed
    #[error("Refusing orphan result for fingerprint {fingerprint}")]
    Orphan { fingerprint: String },

    /// The store lock was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Convenience type alias for Taglens results.
pub type Result<T> = std::result::Result<T, TaglensError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_mentions_path() {
        let err = PipelineError::Decode {
            path: PathBuf::from("/media/broken.jpg"),
            message: "invalid header".to_string(),
        };
        assert!(err.to_string().contains("/media/broken.jpg"));
    }

    #[test]
    fn test_inference_timeout_message() {
        let err = InferenceError::Timeout { timeout_ms: 1500 };
        assert_eq!(err.to_string(), "Inference timed out after 1500ms");
    }

    #[test]
    fn test_config_error_converts_to_top_level() {
        let err: TaglensError = ConfigError::ValidationError("bad".into()).into();
        assert!(matches!(err, TaglensError::Config(_)));
    }
}
