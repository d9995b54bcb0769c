//! Error types shared across csvsync crates.

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum CsvSyncError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CsvSyncError>;
