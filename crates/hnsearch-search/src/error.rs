//! Error types for hnsearch-search

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in embedding, indexing, and query operations
#[derive(Error, Debug)]
pub enum SearchError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed on-disk state (bad magic, misaligned ids/vectors)
    #[error("corrupt data in '{path}': {message}")]
    Corrupt { path: PathBuf, message: String },

    /// Embedding error
    #[error("embedding error: {0}")]
    Embed(String),

    /// Index build or search error
    #[error("index error: {0}")]
    Index(String),

    /// Index files are not built yet
    #[error("index not ready: {0}")]
    NotReady(String),

    /// Caller-supplied input was invalid
    #[error("bad input: {0}")]
    BadInput(String),

    /// Corpus or mirror operation failed during ingestion
    #[error("store error: {0}")]
    Store(#[from] hnsearch_core::CoreError),

    /// Query-time hydration from the relational mirror failed
    #[error("hydrate error: {0}")]
    Hydrate(String),

    /// Checkpoint (de)serialization error
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] serde_json::Error),
}

impl SearchError {
    /// Create a new Corrupt error.
    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<candle_core::Error> for SearchError {
    fn from(err: candle_core::Error) -> Self {
        SearchError::Embed(err.to_string())
    }
}

/// Result type for hnsearch-search operations
pub type Result<T> = std::result::Result<T, SearchError>;
