//! Error types for hnsearch-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in corpus and mirror operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parquet read/write error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow array error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// SQLite mirror error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Malformed record or file contents
    #[error("corrupt data in '{path}': {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl CoreError {
    /// Create a new Corrupt error.
    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for hnsearch-core operations
pub type Result<T> = std::result::Result<T, CoreError>;
