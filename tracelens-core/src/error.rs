//! Error types for tracelens-core

use thiserror::Error;

/// Main error type for the tracelens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive extraction error
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The trace container does not contain a primary .trace entry
    #[error("no .trace file found in {0}")]
    MissingTrace(String),

    /// The trace container path does not exist
    #[error("trace container not found: {0}")]
    ContainerNotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// LLM error
    #[error("LLM error: {0}")]
    Llm(String),
}

/// Result type alias for tracelens-core
pub type Result<T> = std::result::Result<T, Error>;
