//! Error types for the claybrush pipeline

use thiserror::Error;

/// Main error type for the pipeline
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Quanta count mismatch: expected {expected}, found {found}")]
    QuantaCountMismatch { expected: u64, found: u64 },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Budget error: {0}")]
    Budget(String),

    #[error("Brush error: {0}")]
    Brush(String),
}
