//! Error types shared by Licita crates and external sinks

use thiserror::Error;

/// Result type alias for Licita operations
pub type Result<T> = std::result::Result<T, LicitaError>;

/// Main error type for Licita
#[derive(Error, Debug)]
pub enum LicitaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
