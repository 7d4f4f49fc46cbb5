//! Error types for index operations.

/// Errors returned by vector index loading and search.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Embedding dimensions disagree with the index.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// An index entry on disk could not be decoded.
    #[error("corrupted index entry at line {line}: {message}")]
    Corrupted { line: usize, message: String },
}
